use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::services::files::{self, FileError};

/// Status of one image within a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Matched,
    NotMatched,
    QuotaExceeded,
    Error,
    Cancelled,
    Copied,
    CopyError,
}

impl JobStatus {
    /// Whether the job has finished its attempt within the current batch.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }

    /// Whether the job produced an output name.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Matched | JobStatus::Copied
        )
    }
}

/// One image to be titled or searched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJob {
    pub id: Uuid,
    pub source_path: PathBuf,
    pub original_name: String,
    pub status: JobStatus,
    pub new_name: Option<String>,
    pub selected: bool,
    pub error: Option<String>,
}

impl ImageJob {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let original_name = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            source_path,
            original_name,
            status: JobStatus::Pending,
            new_name: None,
            selected: false,
            error: None,
        }
    }

    /// Create pending jobs for every supported image in `folder`.
    pub async fn load_folder(
        folder: &Path,
        allowlist: &[String],
        selected: bool,
    ) -> Result<Vec<ImageJob>, FileError> {
        let paths = files::list_images(folder, allowlist).await?;
        Ok(paths
            .into_iter()
            .map(|path| {
                let mut job = ImageJob::new(path);
                job.selected = selected;
                job
            })
            .collect())
    }

    /// Extension of the source file, with its dot.
    pub fn extension(&self) -> String {
        files::dotted_extension(&self.source_path)
    }

    /// Put the job back to `Pending` before a new batch.
    pub fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.new_name = None;
        self.error = None;
    }
}
