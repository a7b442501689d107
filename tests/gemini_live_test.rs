//! Smoke test against the real Gemini API.
//!
//! Requires GEMINI_TEST_API_KEY and GEMINI_TEST_IMAGE (path to a JPEG or PNG).
//!
//! Run with: cargo test --test gemini_live_test -- --ignored --nocapture

use image_ai_renamer::services::gemini::{self, GeminiClient};
use image_ai_renamer::services::vision::{ImageInput, VisionApi};
use std::path::PathBuf;

fn live_inputs() -> (String, PathBuf) {
    let key = std::env::var("GEMINI_TEST_API_KEY").expect("GEMINI_TEST_API_KEY not set");
    let image = std::env::var("GEMINI_TEST_IMAGE").expect("GEMINI_TEST_IMAGE not set");
    (key, PathBuf::from(image))
}

#[tokio::test]
#[ignore] // Requires a Gemini API key and network access
async fn test_live_title_and_search() {
    let (key, path) = live_inputs();
    let client = GeminiClient::new(gemini::DEFAULT_API_BASE, gemini::DEFAULT_MODEL);
    let image = ImageInput::load(&path).await.expect("Failed to read test image");

    let prompt = gemini::title_prompt("Generate a short, descriptive title for this image.", None);
    let title = client
        .generate_title(&key, &image, &prompt)
        .await
        .expect("Title request failed");
    println!("Title: {}", title);
    assert!(!title.is_empty());

    let verdict = client
        .search_image(&key, &image, "a photograph")
        .await
        .expect("Search request failed");
    println!("Verdict: {:?}", verdict);
}

#[tokio::test]
#[ignore] // Requires network access
async fn test_live_invalid_key_is_not_quota() {
    let (_, path) = live_inputs();
    let client = GeminiClient::new(gemini::DEFAULT_API_BASE, gemini::DEFAULT_MODEL);
    let image = ImageInput::load(&path).await.expect("Failed to read test image");

    let err = client
        .generate_title("not-a-real-key", &image, "Title this image")
        .await
        .expect_err("Invalid key should be rejected");
    assert!(!err.is_quota());
}
