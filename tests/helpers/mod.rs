//! Test helpers: a scripted in-process vision model and scratch folders.

#![allow(dead_code)]

use async_trait::async_trait;
use image_ai_renamer::models::search::SearchVerdict;
use image_ai_renamer::services::cancel::CancelToken;
use image_ai_renamer::services::vision::{ApiError, ImageInput, VisionApi};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One call observed by [`ScriptedVision`].
#[derive(Debug, Clone)]
pub struct Call {
    pub credential: String,
    pub image: String,
    pub kind: &'static str,
    pub at: Instant,
}

/// Vision model fake keyed on image content.
///
/// Test images hold their own name as bytes (see [`write_images`]), so the
/// fake can answer per image without decoding anything.
#[derive(Default)]
pub struct ScriptedVision {
    titles: HashMap<String, String>,
    verdicts: HashMap<String, SearchVerdict>,
    quota: HashSet<(String, String)>,
    quota_everywhere: HashSet<String>,
    failures: HashSet<String>,
    delay: Duration,
    slow: HashMap<String, Duration>,
    cancel_on: Option<(String, CancelToken)>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    per_key: Mutex<HashMap<String, (usize, usize)>>,
}

impl ScriptedVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, image: &str, title: &str) -> Self {
        self.titles.insert(image.to_string(), title.to_string());
        self
    }

    pub fn verdict(mut self, image: &str, is_match: bool, suggested_name: Option<&str>) -> Self {
        self.verdicts.insert(
            image.to_string(),
            SearchVerdict {
                is_match,
                suggested_name: suggested_name.map(str::to_string),
                reason: Some("scripted".to_string()),
                confidence: None,
            },
        );
        self
    }

    /// Answer 429 for `image` when sent with `credential`.
    pub fn quota_for(mut self, image: &str, credential: &str) -> Self {
        self.quota
            .insert((image.to_string(), credential.to_string()));
        self
    }

    /// Answer 429 for `image` whatever the credential.
    pub fn quota_always(mut self, image: &str) -> Self {
        self.quota_everywhere.insert(image.to_string());
        self
    }

    /// Answer a non-quota 500 for `image`.
    pub fn fail(mut self, image: &str) -> Self {
        self.failures.insert(image.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold requests for `image` for `delay` instead of the global delay.
    pub fn slow(mut self, image: &str, delay: Duration) -> Self {
        self.slow.insert(image.to_string(), delay);
        self
    }

    /// Cancel `token` as soon as a request for `image` arrives.
    pub fn cancel_on(mut self, image: &str, token: CancelToken) -> Self {
        self.cancel_on = Some((image.to_string(), token));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous requests seen on any one credential.
    pub fn max_in_flight_per_key(&self) -> usize {
        self.per_key
            .lock()
            .unwrap()
            .values()
            .map(|(_, max)| *max)
            .max()
            .unwrap_or(0)
    }

    fn enter_key(&self, credential: &str) {
        let mut per_key = self.per_key.lock().unwrap();
        let entry = per_key.entry(credential.to_string()).or_default();
        entry.0 += 1;
        entry.1 = entry.1.max(entry.0);
    }

    fn leave_key(&self, credential: &str) {
        if let Some(entry) = self.per_key.lock().unwrap().get_mut(credential) {
            entry.0 -= 1;
        }
    }

    async fn respond(
        &self,
        credential: &str,
        image: &ImageInput,
        kind: &'static str,
    ) -> Result<String, ApiError> {
        let name = String::from_utf8_lossy(&image.bytes).to_string();
        self.calls.lock().unwrap().push(Call {
            credential: credential.to_string(),
            image: name.clone(),
            kind,
            at: Instant::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.enter_key(credential);

        if let Some((target, token)) = &self.cancel_on {
            if *target == name {
                token.cancel();
            }
        }
        let delay = self.slow.get(&name).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.leave_key(credential);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.quota_everywhere.contains(&name)
            || self.quota.contains(&(name.clone(), credential.to_string()))
        {
            return Err(ApiError::Status {
                status: 429,
                body: r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
            });
        }
        if self.failures.contains(&name) {
            return Err(ApiError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(name)
    }
}

#[async_trait]
impl VisionApi for ScriptedVision {
    async fn generate_title(
        &self,
        credential: &str,
        image: &ImageInput,
        _prompt: &str,
    ) -> Result<String, ApiError> {
        let name = self.respond(credential, image, "title").await?;
        Ok(self.titles.get(&name).cloned().unwrap_or(name))
    }

    async fn search_image(
        &self,
        credential: &str,
        image: &ImageInput,
        _description: &str,
    ) -> Result<SearchVerdict, ApiError> {
        let name = self.respond(credential, image, "search").await?;
        Ok(self.verdicts.get(&name).cloned().unwrap_or_default())
    }
}

/// Create `<name>.jpg` files whose content is the name itself.
pub fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(format!("{}.jpg", name));
            std::fs::write(&path, name.as_bytes()).unwrap();
            path
        })
        .collect()
}

/// Occupy `<base>.jpg` and `<base>_1.jpg` through `<base>_<count>.jpg`.
pub fn fill_name_range(dir: &Path, base: &str, count: u32) {
    std::fs::write(dir.join(format!("{}.jpg", base)), b"taken").unwrap();
    for n in 1..=count {
        std::fs::write(dir.join(format!("{}_{}.jpg", base, n)), b"taken").unwrap();
    }
}

/// Sorted file names in `dir`.
pub fn list_names(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
