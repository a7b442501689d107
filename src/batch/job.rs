//! Work done for a single image, shared by both execution modes.

use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::batch::BatchMode;
use crate::models::job::{ImageJob, JobStatus};
use crate::services::cancel::CancelToken;
use crate::services::executor::{
    CredentialStrategy, ExecuteError, RequestExecutor, VisionReply, VisionRequest,
};
use crate::services::files::{self, FileError};
use crate::services::gemini;
use crate::services::naming::{self, NamingError, OutputNamer};
use crate::services::vision::ImageInput;

/// Services and settings shared by every job of one batch.
pub(crate) struct BatchContext {
    pub executor: RequestExecutor,
    pub namer: OutputNamer,
    pub mode: BatchMode,
    pub output_folder: PathBuf,
    /// Title prompt including any user instructions.
    pub title_prompt: String,
    /// Title prompt without user instructions, for naming search matches.
    pub plain_title_prompt: String,
    pub search_description: String,
}

impl BatchContext {
    pub fn new(
        executor: RequestExecutor,
        mode: BatchMode,
        output_folder: PathBuf,
        default_prompt: &str,
        custom_instructions: Option<&str>,
        search_description: Option<&str>,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            namer: OutputNamer::new(),
            mode,
            output_folder,
            title_prompt: gemini::title_prompt(default_prompt, custom_instructions),
            plain_title_prompt: default_prompt.to_string(),
            search_description: search_description.unwrap_or_default().to_string(),
        })
    }
}

/// Owned snapshot of the job fields a worker needs.
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub index: usize,
    pub id: Uuid,
    pub source_path: PathBuf,
    pub extension: String,
}

impl WorkItem {
    pub fn from_job(index: usize, job: &ImageJob) -> Self {
        Self {
            index,
            id: job.id,
            source_path: job.source_path.clone(),
            extension: job.extension(),
        }
    }
}

/// A status change for one job, applied by the single consumer.
#[derive(Debug, Clone)]
pub(crate) struct JobUpdate {
    pub status: JobStatus,
    pub new_name: Option<String>,
    pub selected: Option<bool>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            new_name: None,
            selected: None,
            error: None,
        }
    }

    pub fn failed(status: JobStatus, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::status(status)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum JobFailure {
    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("Unexpected reply from the vision API")]
    UnexpectedReply,
}

impl JobFailure {
    /// Status for failures that do not stop the batch.
    pub fn status(&self) -> JobStatus {
        match self {
            JobFailure::Execute(ExecuteError::Cancelled) => JobStatus::Cancelled,
            JobFailure::Execute(ExecuteError::AllCredentialsExhausted)
            | JobFailure::Execute(ExecuteError::Quota(_)) => JobStatus::QuotaExceeded,
            _ => JobStatus::Error,
        }
    }
}

/// Run one job to completion with the given credential strategy.
pub(crate) async fn process(
    ctx: &BatchContext,
    item: &WorkItem,
    strategy: CredentialStrategy,
    cancel: &CancelToken,
) -> Result<JobUpdate, JobFailure> {
    let image = ImageInput::load(&item.source_path).await?;

    match ctx.mode {
        BatchMode::Rename => rename(ctx, item, &image, strategy, cancel).await,
        BatchMode::Search => search(ctx, item, &image, strategy, cancel).await,
    }
}

async fn rename(
    ctx: &BatchContext,
    item: &WorkItem,
    image: &ImageInput,
    strategy: CredentialStrategy,
    cancel: &CancelToken,
) -> Result<JobUpdate, JobFailure> {
    let title = request_title(ctx, image, &ctx.title_prompt, strategy, cancel).await?;
    let base = naming::sanitize(&title);
    let destination = ctx
        .namer
        .claim(&ctx.output_folder, &base, &item.extension)
        .await?;

    files::copy_file(&item.source_path, &destination, true).await?;

    let new_name = files::file_name_of(&destination);
    tracing::debug!(job_id = %item.id, new_name = %new_name, "Image renamed");

    Ok(JobUpdate {
        new_name: Some(new_name),
        ..JobUpdate::status(JobStatus::Completed)
    })
}

async fn search(
    ctx: &BatchContext,
    item: &WorkItem,
    image: &ImageInput,
    strategy: CredentialStrategy,
    cancel: &CancelToken,
) -> Result<JobUpdate, JobFailure> {
    let request = VisionRequest::Search {
        description: ctx.search_description.clone(),
    };
    let verdict = match ctx.executor.run(image, &request, strategy, cancel).await? {
        VisionReply::Search(verdict) => verdict,
        VisionReply::Title(_) => return Err(JobFailure::UnexpectedReply),
    };

    if !verdict.is_match {
        tracing::debug!(job_id = %item.id, reason = ?verdict.reason, "Image did not match");
        return Ok(JobUpdate {
            selected: Some(false),
            ..JobUpdate::status(JobStatus::NotMatched)
        });
    }

    let suggested = match verdict.usable_name() {
        Some(name) => name.to_string(),
        None => request_title(ctx, image, &ctx.plain_title_prompt, strategy, cancel).await?,
    };
    let base = naming::sanitize(&suggested);
    let destination = ctx
        .namer
        .claim(&ctx.output_folder, &base, &item.extension)
        .await?;

    let new_name = files::file_name_of(&destination);
    tracing::debug!(job_id = %item.id, new_name = %new_name, "Image matched search");

    Ok(JobUpdate {
        new_name: Some(new_name),
        selected: Some(true),
        ..JobUpdate::status(JobStatus::Matched)
    })
}

async fn request_title(
    ctx: &BatchContext,
    image: &ImageInput,
    prompt: &str,
    strategy: CredentialStrategy,
    cancel: &CancelToken,
) -> Result<String, JobFailure> {
    let request = VisionRequest::Title {
        prompt: prompt.to_string(),
    };
    match ctx.executor.run(image, &request, strategy, cancel).await? {
        VisionReply::Title(title) => Ok(title),
        VisionReply::Search(_) => Err(JobFailure::UnexpectedReply),
    }
}
