use crate::batch::job::{self, BatchContext, JobFailure, JobUpdate, WorkItem};
use crate::batch::{BatchError, Reporter};
use crate::models::job::{ImageJob, JobStatus};
use crate::services::cancel::CancelToken;
use crate::services::executor::{CredentialStrategy, ExecuteError};

/// Process jobs one at a time in input order, drawing keys adaptively.
///
/// Running out of keys stops the batch; later jobs stay `Pending`.
pub(crate) async fn run(
    ctx: &BatchContext,
    jobs: &mut [ImageJob],
    cancel: &CancelToken,
    reporter: &mut Reporter<'_>,
) -> Result<(), BatchError> {
    for (index, job) in jobs.iter_mut().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(next = index, "Batch cancelled, stopping");
            break;
        }

        let item = WorkItem::from_job(index, job);
        reporter.apply(index, job, JobUpdate::status(JobStatus::InProgress));
        tracing::debug!(job_id = %item.id, path = ?item.source_path, "Processing image");

        match job::process(ctx, &item, CredentialStrategy::Adaptive, cancel).await {
            Ok(update) => reporter.apply(index, job, update),
            Err(failure @ JobFailure::Execute(ExecuteError::AllCredentialsExhausted)) => {
                tracing::error!(job_id = %item.id, "All API keys exhausted, stopping batch");
                reporter.apply(index, job, JobUpdate::failed(JobStatus::Error, &failure));
                return Err(BatchError::AllCredentialsExhausted);
            }
            Err(JobFailure::Naming(e)) => {
                tracing::error!(job_id = %item.id, error = %e, "Could not find a free output name");
                reporter.apply(index, job, JobUpdate::failed(JobStatus::Error, &e));
                return Err(BatchError::Naming(e));
            }
            Err(failure) => {
                let status = failure.status();
                if status == JobStatus::Cancelled {
                    tracing::info!(job_id = %item.id, "Image processing cancelled");
                } else {
                    tracing::error!(job_id = %item.id, error = %failure, "Error processing image");
                }
                reporter.apply(index, job, JobUpdate::failed(status, &failure));
            }
        }
    }

    Ok(())
}
