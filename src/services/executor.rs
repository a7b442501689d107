//! One vision call per attempt, plus the credential rotation loops around it.
//!
//! Quota errors are credential-specific and trigger a retry on another key.
//! Every other failure is returned as-is; it is assumed not to depend on
//! which key was used.

use std::sync::Arc;
use std::time::Instant;

use crate::models::search::SearchVerdict;
use crate::services::cancel::CancelToken;
use crate::services::credentials::CredentialPool;
use crate::services::rate_limit::RateLimiter;
use crate::services::vision::{ApiError, ImageInput, VisionApi};

/// What to ask the model for.
#[derive(Debug, Clone)]
pub enum VisionRequest {
    Title { prompt: String },
    Search { description: String },
}

#[derive(Debug, Clone)]
pub enum VisionReply {
    Title(String),
    Search(SearchVerdict),
}

/// How credentials are chosen across retries of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStrategy {
    /// Take from the pool's available queue, quarantining keys that hit quota.
    Adaptive,
    /// Start at a fixed slot and walk forward through the configured order.
    FromIndex(usize),
}

pub struct RequestExecutor {
    api: Arc<dyn VisionApi>,
    pool: Arc<CredentialPool>,
    limiter: Arc<RateLimiter>,
}

impl RequestExecutor {
    pub fn new(api: Arc<dyn VisionApi>, pool: Arc<CredentialPool>, limiter: Arc<RateLimiter>) -> Self {
        Self { api, pool, limiter }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Perform a single attempt with `credential`, after its rate-limit turn.
    pub async fn execute_request(
        &self,
        credential: &str,
        image: &ImageInput,
        request: &VisionRequest,
        cancel: &CancelToken,
    ) -> Result<VisionReply, ExecuteError> {
        self.limiter
            .await_turn(credential, cancel)
            .await
            .map_err(|_| ExecuteError::Cancelled)?;

        let start = Instant::now();
        let call = async {
            match request {
                VisionRequest::Title { prompt } => self
                    .api
                    .generate_title(credential, image, prompt)
                    .await
                    .map(VisionReply::Title),
                VisionRequest::Search { description } => self
                    .api
                    .search_image(credential, image, description)
                    .await
                    .map(VisionReply::Search),
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                metrics::counter!("vision_requests_total", "outcome" => "cancelled").increment(1);
                return Err(ExecuteError::Cancelled);
            }
            result = call => result,
        };

        metrics::histogram!("vision_request_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(reply) => {
                metrics::counter!("vision_requests_total", "outcome" => "ok").increment(1);
                Ok(reply)
            }
            Err(e) if e.is_quota() => {
                metrics::counter!("vision_requests_total", "outcome" => "quota").increment(1);
                Err(ExecuteError::Quota(e))
            }
            Err(e) => {
                metrics::counter!("vision_requests_total", "outcome" => "error").increment(1);
                Err(ExecuteError::Fatal(e))
            }
        }
    }

    /// Run a request, rotating credentials on quota errors.
    ///
    /// At most one attempt per configured credential is made.
    pub async fn run(
        &self,
        image: &ImageInput,
        request: &VisionRequest,
        strategy: CredentialStrategy,
        cancel: &CancelToken,
    ) -> Result<VisionReply, ExecuteError> {
        if self.pool.is_empty() {
            return Err(ExecuteError::NoCredentials);
        }
        match strategy {
            CredentialStrategy::Adaptive => self.run_adaptive(image, request, cancel).await,
            CredentialStrategy::FromIndex(start) => {
                self.run_from_index(start, image, request, cancel).await
            }
        }
    }

    async fn run_adaptive(
        &self,
        image: &ImageInput,
        request: &VisionRequest,
        cancel: &CancelToken,
    ) -> Result<VisionReply, ExecuteError> {
        let max_attempts = self.pool.len();

        for attempt in 1..=max_attempts {
            let credential = self
                .pool
                .take_available()
                .ok_or(ExecuteError::NoCredentials)?;
            let key_index = self.pool.index_of(&credential);

            tracing::debug!(key_index = ?key_index, attempt, "Sending vision request");

            match self.execute_request(&credential, image, request, cancel).await {
                Ok(reply) => {
                    self.pool.mark_success(&credential);
                    return Ok(reply);
                }
                Err(ExecuteError::Quota(e)) => {
                    tracing::warn!(key_index = ?key_index, error = %e, "API key quota exceeded, marking as exhausted");
                    metrics::counter!("credential_exhaustions_total").increment(1);
                    self.pool.mark_exhausted(&credential);
                }
                Err(e) => {
                    self.pool.mark_success(&credential);
                    return Err(e);
                }
            }
        }

        tracing::error!(attempts = max_attempts, "All API keys exhausted");
        Err(ExecuteError::AllCredentialsExhausted)
    }

    async fn run_from_index(
        &self,
        start: usize,
        image: &ImageInput,
        request: &VisionRequest,
        cancel: &CancelToken,
    ) -> Result<VisionReply, ExecuteError> {
        let max_attempts = self.pool.len();

        for offset in 0..max_attempts {
            let key_index = (start + offset) % max_attempts;
            let credential = self
                .pool
                .credential_at(key_index)
                .ok_or(ExecuteError::NoCredentials)?;

            tracing::debug!(key_index, attempt = offset + 1, "Sending vision request");

            match self.execute_request(&credential, image, request, cancel).await {
                Ok(reply) => return Ok(reply),
                Err(ExecuteError::Quota(e)) => {
                    tracing::warn!(key_index, error = %e, "API key quota exceeded, rotating to next key");
                    metrics::counter!("credential_exhaustions_total").increment(1);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(attempts = max_attempts, "All API keys exhausted");
        Err(ExecuteError::AllCredentialsExhausted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("API key quota exceeded: {0}")]
    Quota(#[source] ApiError),

    #[error("All API keys exhausted")]
    AllCredentialsExhausted,

    #[error("No API keys configured")]
    NoCredentials,

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Fatal(ApiError),
}
