//! Batch orchestration: drives per-image jobs against a pool of API keys,
//! either one at a time or one in flight per key.
//!
//! Job state is only ever written by the task that called
//! [`BatchOrchestrator::run`]; parallel workers publish their updates over a
//! channel and that task applies them in arrival order.

mod job;
mod parallel;
mod sequential;
pub mod state;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::batch::{BatchMode, BatchSummary, CopyReport};
use crate::models::job::{ImageJob, JobStatus};
use crate::services::cancel::CancelToken;
use crate::services::credentials::CredentialPool;
use crate::services::executor::RequestExecutor;
use crate::services::files;
use crate::services::naming::{self, NamingError};
use crate::services::rate_limit::RateLimiter;
use crate::services::vision::VisionApi;

use job::{BatchContext, JobUpdate};
use state::BatchState;

/// Everything a batch needs besides the jobs and the keys.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: BatchMode,
    pub output_folder: PathBuf,
    pub default_prompt: String,
    pub custom_instructions: Option<String>,
    pub search_description: Option<String>,
    /// Run jobs concurrently; needs at least two keys.
    pub speed_boost: bool,
    pub max_concurrency: Option<usize>,
    pub request_delay: Duration,
}

impl BatchOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mode: config.mode,
            output_folder: config.output_folder.clone(),
            default_prompt: config.default_prompt.clone(),
            custom_instructions: config.custom_instructions.clone(),
            search_description: config.search_description.clone(),
            speed_boost: config.speed_boost,
            max_concurrency: config.max_concurrency,
            request_delay: config.request_delay(),
        }
    }
}

/// Notifications published while a batch runs.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        total: usize,
    },
    JobUpdated {
        index: usize,
        job_id: Uuid,
        status: JobStatus,
        new_name: Option<String>,
    },
    Progress {
        processed: usize,
        total: usize,
    },
    Finished {
        elapsed: Duration,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("No API keys provided")]
    NoCredentials,

    #[error("All API keys exhausted")]
    AllCredentialsExhausted,

    #[error("A search description is required in search mode")]
    MissingDescription,

    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("Failed to create output folder {0:?}: {1}")]
    OutputFolder(PathBuf, #[source] std::io::Error),

    #[error(transparent)]
    Naming(#[from] NamingError),
}

pub struct BatchOrchestrator {
    api: Arc<dyn VisionApi>,
    state: Arc<BatchState>,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl BatchOrchestrator {
    pub fn new(api: Arc<dyn VisionApi>) -> Self {
        Self {
            api,
            state: Arc::new(BatchState::default()),
            events: None,
        }
    }

    /// Publish [`BatchEvent`]s to `events` while batches run.
    pub fn with_events(mut self, events: UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> Arc<BatchState> {
        self.state.clone()
    }

    /// Process `jobs` with the given keys.
    ///
    /// Per-job failures are recorded on the jobs. An `Err` is returned only
    /// for conditions that stop the whole batch; jobs finished before that
    /// keep their status.
    pub async fn run(
        &self,
        jobs: &mut [ImageJob],
        credentials: Vec<String>,
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> Result<BatchSummary, BatchError> {
        let pool = Arc::new(CredentialPool::new(credentials));
        if pool.is_empty() {
            return Err(BatchError::NoCredentials);
        }

        let description = match options.mode {
            BatchMode::Search => Some(
                options
                    .search_description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .ok_or(BatchError::MissingDescription)?,
            ),
            BatchMode::Rename => None,
        };

        tokio::fs::create_dir_all(&options.output_folder)
            .await
            .map_err(|e| BatchError::OutputFolder(options.output_folder.clone(), e))?;

        let limiter = Arc::new(RateLimiter::new(options.request_delay));
        let executor = RequestExecutor::new(self.api.clone(), pool.clone(), limiter);
        let ctx = BatchContext::new(
            executor,
            options.mode,
            options.output_folder.clone(),
            &options.default_prompt,
            options.custom_instructions.as_deref(),
            description,
        );

        for job in jobs.iter_mut() {
            job.reset();
        }

        let started_at = Utc::now();
        let _guard = self.state.begin(jobs.len(), self.events.clone())?;
        let mut reporter = Reporter::new(options.mode, &self.state, self.events.as_ref(), jobs.len());

        let parallel = options.speed_boost && pool.len() >= 2;
        if options.speed_boost && !parallel {
            tracing::warn!("Speed boost needs at least two API keys, processing sequentially");
        }

        tracing::info!(
            mode = %options.mode,
            total = jobs.len(),
            keys = pool.len(),
            parallel,
            "Starting batch"
        );

        let outcome = if parallel {
            let concurrency = options
                .max_concurrency
                .unwrap_or(pool.len())
                .clamp(1, pool.len());
            parallel::run(ctx, jobs, concurrency, cancel, &mut reporter).await
        } else {
            sequential::run(&ctx, jobs, cancel, &mut reporter).await
        };

        let summary = summarize(
            options.mode,
            jobs,
            cancel.is_cancelled(),
            started_at,
            self.state.elapsed(),
        );
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            matched = summary.matched,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "{}",
            summary
        );

        outcome.map(|()| summary)
    }

    /// Copy every selected, matched job into `output_folder` under its
    /// assigned name, re-checking the folder for collisions.
    pub async fn copy_selected(&self, jobs: &mut [ImageJob], output_folder: &Path) -> CopyReport {
        let mut report = CopyReport::default();

        for (index, job) in jobs.iter_mut().enumerate() {
            if !job.selected || job.status != JobStatus::Matched {
                continue;
            }

            let file_name = job
                .new_name
                .clone()
                .unwrap_or_else(|| files::file_name_of(&job.source_path));
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| job.original_name.clone());

            let unique =
                naming::unique_on_disk(output_folder.to_path_buf(), stem, job.extension()).await;
            let result = match unique {
                Ok(destination) => files::copy_file(&job.source_path, &destination, true)
                    .await
                    .map(|()| destination)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(destination) => {
                    job.status = JobStatus::Copied;
                    job.new_name = Some(files::file_name_of(&destination));
                    job.error = None;
                    report.copied += 1;
                }
                Err(error) => {
                    tracing::warn!(job_id = %job.id, error = %error, "Failed to copy image");
                    job.status = JobStatus::CopyError;
                    job.error = Some(error);
                    report.failed += 1;
                }
            }

            if let Some(tx) = &self.events {
                let _ = tx.send(BatchEvent::JobUpdated {
                    index,
                    job_id: job.id,
                    status: job.status,
                    new_name: job.new_name.clone(),
                });
            }
        }

        tracing::info!(copied = report.copied, failed = report.failed, "Copied selected images");
        report
    }
}

fn summarize(
    mode: BatchMode,
    jobs: &[ImageJob],
    cancelled: bool,
    started_at: DateTime<Utc>,
    elapsed: Duration,
) -> BatchSummary {
    let count = |pred: fn(JobStatus) -> bool| jobs.iter().filter(|j| pred(j.status)).count();
    BatchSummary {
        mode,
        total: jobs.len(),
        processed: count(JobStatus::is_terminal),
        succeeded: count(JobStatus::is_success),
        matched: count(|s| s == JobStatus::Matched),
        failed: count(|s| matches!(s, JobStatus::Error | JobStatus::QuotaExceeded)),
        cancelled,
        started_at,
        elapsed,
    }
}

/// Applies job updates and publishes progress. Owned by the batch's
/// single consumer.
pub(crate) struct Reporter<'a> {
    mode: BatchMode,
    state: &'a BatchState,
    events: Option<&'a UnboundedSender<BatchEvent>>,
    total: usize,
}

impl<'a> Reporter<'a> {
    fn new(
        mode: BatchMode,
        state: &'a BatchState,
        events: Option<&'a UnboundedSender<BatchEvent>>,
        total: usize,
    ) -> Self {
        Self {
            mode,
            state,
            events,
            total,
        }
    }

    pub(crate) fn apply(&mut self, index: usize, job: &mut ImageJob, update: JobUpdate) {
        job.status = update.status;
        if let Some(name) = update.new_name {
            job.new_name = Some(name);
        }
        if let Some(selected) = update.selected {
            job.selected = selected;
        }
        job.error = update.error;

        self.publish(BatchEvent::JobUpdated {
            index,
            job_id: job.id,
            status: job.status,
            new_name: job.new_name.clone(),
        });

        if job.status.is_terminal() {
            metrics::counter!(
                "image_jobs_total",
                "mode" => self.mode.to_string(),
                "status" => job.status.to_string()
            )
            .increment(1);

            let processed = self.state.record_processed();
            tracing::info!(
                job_id = %job.id,
                status = %job.status,
                "Processed {} of {}",
                processed,
                self.total
            );
            self.publish(BatchEvent::Progress {
                processed,
                total: self.total,
            });
        }
    }

    fn publish(&self, event: BatchEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}
