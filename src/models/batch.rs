use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use strum::{Display, EnumString};

/// What a batch asks of the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BatchMode {
    /// Title every image and copy it to the output folder under that title.
    #[default]
    Rename,
    /// Check every image against a description and name the matches.
    Search,
}

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub mode: BatchMode,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub matched: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            BatchMode::Rename => write!(
                f,
                "Renamed {} of {} images ({} failed) in {}",
                self.succeeded,
                self.total,
                self.failed,
                format_elapsed(self.elapsed)
            )?,
            BatchMode::Search => write!(
                f,
                "Found {} matching images out of {} ({} failed) in {}",
                self.matched,
                self.total,
                self.failed,
                format_elapsed(self.elapsed)
            )?,
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Result of copying selected matches into the output folder.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: usize,
    pub failed: usize,
}

/// `HH:MM:SS`, hours not wrapped at 24.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
