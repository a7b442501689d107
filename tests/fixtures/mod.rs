//! Shared inputs for the batch tests.

#![allow(dead_code)]

use image_ai_renamer::batch::BatchOptions;
use image_ai_renamer::models::batch::BatchMode;
use std::path::Path;
use std::time::Duration;

pub const PROMPT: &str = "Generate a short, descriptive title for this image.";

pub const THREE_IMAGES: &[&str] = &["img1", "img2", "img3"];
pub const FOUR_IMAGES: &[&str] = &["img1", "img2", "img3", "img4"];

pub fn keys(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("key-{}", i)).collect()
}

/// Rename-mode options with no pacing between requests.
pub fn rename_options(output: &Path) -> BatchOptions {
    BatchOptions {
        mode: BatchMode::Rename,
        output_folder: output.to_path_buf(),
        default_prompt: PROMPT.to_string(),
        custom_instructions: None,
        search_description: None,
        speed_boost: false,
        max_concurrency: None,
        request_delay: Duration::ZERO,
    }
}

pub fn parallel_options(output: &Path) -> BatchOptions {
    BatchOptions {
        speed_boost: true,
        ..rename_options(output)
    }
}

pub fn search_options(output: &Path, description: &str) -> BatchOptions {
    BatchOptions {
        mode: BatchMode::Search,
        search_description: Some(description.to_string()),
        ..rename_options(output)
    }
}

pub fn extensions() -> Vec<String> {
    vec![".jpg".to_string()]
}
