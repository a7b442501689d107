use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};

use crate::batch::job::{self, BatchContext, JobFailure, JobUpdate, WorkItem};
use crate::batch::{BatchError, Reporter};
use crate::models::job::{ImageJob, JobStatus};
use crate::services::cancel::CancelToken;
use crate::services::executor::CredentialStrategy;
use crate::services::naming::NamingError;

struct WorkerEvent {
    index: usize,
    update: JobUpdate,
}

/// Set when a worker hits an error that should stop the batch.
#[derive(Default)]
struct Halt {
    raised: AtomicBool,
    error: Mutex<Option<NamingError>>,
}

impl Halt {
    fn raise(&self, error: NamingError) {
        let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert(error);
        self.raised.store(true, Ordering::SeqCst);
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    fn take(&self) -> Option<NamingError> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Process jobs concurrently, at most `concurrency` in flight.
///
/// Each job starts on the next round-robin key and walks forward through the
/// pool on quota errors. A job that runs out of keys is marked
/// `QuotaExceeded`; the others carry on.
///
/// A job holds its starting key's lock until it finishes, so at most one job
/// is in flight per starting key. Keys reached by quota rotation are shared.
pub(crate) async fn run(
    ctx: Arc<BatchContext>,
    jobs: &mut [ImageJob],
    concurrency: usize,
    cancel: &CancelToken,
    reporter: &mut Reporter<'_>,
) -> Result<(), BatchError> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let halt = Arc::new(Halt::default());
    let key_locks: Arc<Vec<Arc<AsyncMutex<()>>>> = Arc::new(
        (0..ctx.executor.pool().len())
            .map(|_| Arc::new(AsyncMutex::new(())))
            .collect(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();

    tracing::info!(concurrency, "Processing images in parallel");

    let mut handles = Vec::with_capacity(jobs.len());
    for (index, job) in jobs.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        let item = WorkItem::from_job(index, job);
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        let halt = halt.clone();
        let key_locks = key_locks.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();

        handles.push(tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            if cancel.is_cancelled() || halt.is_raised() {
                return;
            }

            let slot = ctx.executor.pool().next_round_robin_index();
            let _key = match key_locks.get(slot) {
                Some(lock) => tokio::select! {
                    _ = cancel.cancelled() => return,
                    guard = lock.clone().lock_owned() => Some(guard),
                },
                None => None,
            };
            if cancel.is_cancelled() || halt.is_raised() {
                return;
            }

            let _ = tx.send(WorkerEvent {
                index: item.index,
                update: JobUpdate::status(JobStatus::InProgress),
            });
            tracing::debug!(job_id = %item.id, slot, "Processing image");

            let update = match job::process(&ctx, &item, CredentialStrategy::FromIndex(slot), &cancel).await {
                Ok(update) => update,
                Err(JobFailure::Naming(e)) => {
                    tracing::error!(job_id = %item.id, error = %e, "Could not find a free output name");
                    let update = JobUpdate::failed(JobStatus::Error, &e);
                    halt.raise(e);
                    update
                }
                Err(failure) => {
                    let status = failure.status();
                    match status {
                        JobStatus::Cancelled => {
                            tracing::info!(job_id = %item.id, "Image processing cancelled")
                        }
                        JobStatus::QuotaExceeded => {
                            tracing::warn!(job_id = %item.id, error = %failure, "No API key had quota left")
                        }
                        _ => tracing::error!(job_id = %item.id, error = %failure, "Error processing image"),
                    }
                    JobUpdate::failed(status, &failure)
                }
            };

            let _ = tx.send(WorkerEvent {
                index: item.index,
                update,
            });
        }));
    }
    drop(tx);

    while let Some(event) = rx.recv().await {
        if let Some(job) = jobs.get_mut(event.index) {
            reporter.apply(event.index, job, event.update);
        }
    }

    for result in join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Image worker task failed");
        }
    }

    // A panicked worker never reports back.
    for (index, job) in jobs.iter_mut().enumerate() {
        if job.status == JobStatus::InProgress {
            reporter.apply(index, job, JobUpdate::failed(JobStatus::Error, "worker task failed"));
        }
    }

    match halt.take() {
        Some(e) => Err(BatchError::Naming(e)),
        None => Ok(()),
    }
}
