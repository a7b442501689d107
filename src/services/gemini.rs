use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::search::SearchVerdict;
use crate::services::vision::{ApiError, ImageInput, VisionApi};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Longest reason kept when the search reply is not valid JSON.
const MAX_FALLBACK_REASON_CHARS: usize = 200;

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    api_base: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn generate(
        &self,
        credential: &str,
        image: &ImageInput,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String, ApiError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);

        let request_body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    {
                        "inline_data": {
                            "mime_type": image.mime_type,
                            "data": base64::engine::general_purpose::STANDARD.encode(&image.bytes)
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_output_tokens
            }
        });

        let response = self
            .http
            .post(&url)
            .query(&[("key", credential)])
            .json(&request_body)
            .send()
            .await
            .map_err(ApiError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), error = %body, "Gemini API error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(ApiError::Http)?;
        first_text(parsed).ok_or(ApiError::EmptyResponse)
    }
}

fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[async_trait]
impl VisionApi for GeminiClient {
    async fn generate_title(
        &self,
        credential: &str,
        image: &ImageInput,
        prompt: &str,
    ) -> Result<String, ApiError> {
        self.generate(credential, image, prompt, 0.0, 50).await
    }

    async fn search_image(
        &self,
        credential: &str,
        image: &ImageInput,
        description: &str,
    ) -> Result<SearchVerdict, ApiError> {
        let prompt = search_prompt(description);
        let text = self.generate(credential, image, &prompt, 0.3, 200).await?;
        Ok(parse_search_reply(&text))
    }
}

/// Title prompt with optional user instructions appended.
pub fn title_prompt(default_prompt: &str, instructions: Option<&str>) -> String {
    match instructions.map(str::trim).filter(|i| !i.is_empty()) {
        Some(extra) => format!("{}\n\nAdditional User Instructions: {}", default_prompt, extra),
        None => default_prompt.to_string(),
    }
}

pub fn search_prompt(description: &str) -> String {
    format!(
        concat!(
            "Analyze this image and determine if it contains or shows: {}\n\n",
            "Respond with a JSON object in this exact format:\n",
            "{{\n",
            "  \"isMatch\": true or false,\n",
            "  \"suggestedName\": \"appropriate filename based on image content\",\n",
            "  \"reason\": \"brief explanation of why it matches or not\"\n",
            "}}\n\n",
            "If the image matches the description, set isMatch to true and generate an ",
            "appropriate filename. If it doesn't match, set isMatch to false.\n",
            "Return ONLY the JSON object, no other text."
        ),
        description
    )
}

/// Parse a search reply, tolerating code fences and non-JSON answers.
pub fn parse_search_reply(text: &str) -> SearchVerdict {
    let json_text = strip_code_fence(text);
    if let Ok(verdict) = serde_json::from_str::<SearchVerdict>(json_text) {
        return verdict;
    }

    tracing::warn!("Failed to parse search reply as JSON, using text heuristics");
    SearchVerdict {
        is_match: heuristic_match(text),
        suggested_name: None,
        reason: Some(text.chars().take(MAX_FALLBACK_REASON_CHARS).collect()),
        confidence: None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn heuristic_match(text: &str) -> bool {
    let lower = text.to_lowercase();

    if let Some(pos) = lower.find("ismatch") {
        let value = lower[pos + "ismatch".len()..]
            .trim_start_matches(|c: char| c == '"' || c == '\'' || c == ':' || c.is_whitespace());
        return value.starts_with("true");
    }

    if lower.contains("no match") || lower.contains("not match") {
        return false;
    }

    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| matches!(word, "match" | "matches" | "true" | "yes"))
}
