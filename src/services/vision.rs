//! The seam between the batch core and a remote vision model.

use async_trait::async_trait;
use std::path::Path;

use crate::models::search::SearchVerdict;
use crate::services::files::{self, FileError};

/// Image payload sent with every request.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Read an image from disk and work out its MIME type.
    pub async fn load(path: &Path) -> Result<Self, FileError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FileError::ReadImage(path.to_path_buf(), e))?;
        let mime_type = detect_mime_type(path, &bytes);
        Ok(Self { bytes, mime_type })
    }
}

/// MIME type from the extension, falling back to sniffing the bytes.
pub fn detect_mime_type(path: &Path, bytes: &[u8]) -> String {
    match files::extension_of(path).as_deref() {
        Some("png") => return "image/png".to_string(),
        Some("webp") => return "image/webp".to_string(),
        Some("jpg") | Some("jpeg") => return "image/jpeg".to_string(),
        _ => {}
    }

    match image::guess_format(bytes) {
        Ok(format) => format.to_mime_type().to_string(),
        Err(_) => "image/jpeg".to_string(),
    }
}

/// A remote model able to title and classify images.
///
/// `credential` is the API key to authenticate this single call with; the
/// implementation must not pick or rotate keys itself.
#[async_trait]
pub trait VisionApi: Send + Sync {
    /// Short descriptive title for the image.
    async fn generate_title(
        &self,
        credential: &str,
        image: &ImageInput,
        prompt: &str,
    ) -> Result<String, ApiError>;

    /// Decide whether the image matches a free-text description.
    async fn search_image(
        &self,
        credential: &str,
        image: &ImageInput,
        description: &str,
    ) -> Result<SearchVerdict, ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Empty response from API")]
    EmptyResponse,

    #[error("Failed to parse API response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Whether this error means the credential ran out of quota.
    pub fn is_quota(&self) -> bool {
        match self {
            ApiError::Status { status, body } => is_quota_error(*status, body),
            ApiError::Http(e) => {
                e.status().map(|s| s.as_u16()) == Some(429) || mentions_quota(&e.to_string())
            }
            ApiError::Other(message) => mentions_quota(message),
            ApiError::EmptyResponse | ApiError::Parse(_) => false,
        }
    }
}

/// Quota check on an HTTP status and response body.
pub fn is_quota_error(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    if body.trim().is_empty() {
        return false;
    }
    if mentions_quota(body) {
        return true;
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            let error = &value["error"];
            let exhausted = error["status"]
                .as_str()
                .map(|s| s.eq_ignore_ascii_case("RESOURCE_EXHAUSTED"))
                .unwrap_or(false);
            exhausted || error["code"].as_i64() == Some(429)
        }
        Err(_) => false,
    }
}

/// Markers that flag a credential-specific quota failure in an error message.
const QUOTA_MARKERS: &[&str] = &["429", "quota", "resource_exhausted", "rate limit", "نفاذ"];

fn mentions_quota(text: &str) -> bool {
    let lower = text.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_429_is_quota() {
        assert!(is_quota_error(429, ""));
        assert!(ApiError::Status {
            status: 429,
            body: String::new()
        }
        .is_quota());
    }

    #[test]
    fn test_body_markers_are_quota() {
        assert!(is_quota_error(400, "Quota exceeded for metric"));
        assert!(is_quota_error(503, "RESOURCE_EXHAUSTED"));
        assert!(is_quota_error(500, "rate limit reached, slow down"));
        assert!(is_quota_error(
            400,
            r#"{"error":{"code":400,"status":"resource_exhausted","message":"x"}}"#
        ));
        assert!(is_quota_error(
            403,
            r#"{"error":{"code":429,"status":"UNKNOWN","message":"x"}}"#
        ));
    }

    #[test]
    fn test_any_quota_mention_is_quota() {
        assert!(ApiError::Status {
            status: 400,
            body: "Quota project not set for this key".into()
        }
        .is_quota());
        assert!(is_quota_error(403, "تم نفاذ الحصة"));
        assert!(ApiError::Other("daily QUOTA reached".into()).is_quota());
    }

    #[test]
    fn test_other_errors_are_not_quota() {
        assert!(!is_quota_error(400, "API key not valid"));
        assert!(!is_quota_error(500, ""));
        assert!(!ApiError::EmptyResponse.is_quota());
        assert!(ApiError::Other("Too many requests: rate limit".into()).is_quota());
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(detect_mime_type(Path::new("a.PNG"), b""), "image/png");
        assert_eq!(detect_mime_type(Path::new("a.webp"), b""), "image/webp");
        assert_eq!(detect_mime_type(Path::new("a.jpeg"), b""), "image/jpeg");
    }

    #[test]
    fn test_mime_sniffs_unknown_extension() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime_type(Path::new("a.bin"), &png_magic), "image/png");
        assert_eq!(detect_mime_type(Path::new("a.bin"), b"garbage"), "image/jpeg");
    }
}
