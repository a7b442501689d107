use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::batch::BatchMode;
use crate::services::gemini;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Folder with the images to process
    #[garde(skip)]
    pub source_folder: PathBuf,

    /// Folder that receives renamed copies
    #[garde(skip)]
    pub output_folder: PathBuf,

    /// "rename" or "search"
    #[serde(default)]
    #[garde(skip)]
    pub mode: BatchMode,

    /// What to look for in search mode
    #[serde(default)]
    #[garde(length(min = 1, max = 2000))]
    pub search_description: Option<String>,

    /// Extra instructions appended to the title prompt
    #[serde(default)]
    #[garde(length(max = 2000))]
    pub custom_instructions: Option<String>,

    /// Comma-separated API keys. When set they are also saved to `credentials_file`.
    #[serde(default)]
    #[garde(skip)]
    pub api_keys: Option<String>,

    /// Newline-delimited API key file
    #[serde(default = "default_credentials_file")]
    #[garde(skip)]
    pub credentials_file: PathBuf,

    /// Gemini API base URL
    #[serde(default = "default_gemini_api_base")]
    #[garde(length(min = 1))]
    pub gemini_api_base: String,

    /// Gemini model name (e.g., "gemini-2.0-flash")
    #[serde(default = "default_gemini_model")]
    #[garde(length(min = 1, max = 200))]
    pub gemini_model: String,

    /// Prompt used to title images
    #[serde(default = "default_prompt")]
    #[garde(length(min = 1))]
    pub default_prompt: String,

    /// Minimum seconds between two requests on the same key
    #[serde(default = "default_request_delay_secs")]
    #[garde(range(min = 0.0, max = 3600.0))]
    pub request_delay_secs: f64,

    /// Image extensions picked up from the source folder
    #[serde(default = "default_supported_extensions")]
    #[garde(length(min = 1))]
    pub supported_extensions: Vec<String>,

    /// Process images concurrently, one in flight per key (needs 2+ keys)
    #[serde(default)]
    #[garde(skip)]
    pub speed_boost: bool,

    /// Upper bound on concurrent requests in speed boost mode
    #[serde(default)]
    #[garde(range(min = 1))]
    pub max_concurrency: Option<usize>,

    /// Write a Prometheus text snapshot here when a batch ends
    #[serde(default)]
    #[garde(skip)]
    pub metrics_textfile: Option<PathBuf>,
}

fn default_credentials_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("image-ai-renamer"))
        .unwrap_or_default()
        .join("apikeys.txt")
}

fn default_gemini_api_base() -> String {
    gemini::DEFAULT_API_BASE.to_string()
}

fn default_gemini_model() -> String {
    gemini::DEFAULT_MODEL.to_string()
}

fn default_prompt() -> String {
    concat!(
        "Generate a short, descriptive title for this image in 2 to 6 words. ",
        "Describe the main subject. Return only the title, without quotes, ",
        "punctuation or file extension."
    )
    .to_string()
}

fn default_request_delay_secs() -> f64 {
    2.0
}

fn default_supported_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the rules that span several fields.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !self.request_delay_secs.is_finite() {
            return Err(ConfigError::Invalid(
                "REQUEST_DELAY_SECS must be a finite number".to_string(),
            ));
        }
        if self.mode == BatchMode::Search && self.search_description.is_none() {
            return Err(ConfigError::Invalid(
                "SEARCH_DESCRIPTION is required in search mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Values `check` would reject map to no delay.
    pub fn request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_delay_secs).unwrap_or_default()
    }

    /// Keys given inline through `API_KEYS`, split on commas and newlines.
    pub fn inline_api_keys(&self) -> Vec<String> {
        self.api_keys
            .as_deref()
            .map(|keys| {
                keys.split([',', '\n', '\r'])
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
