use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

use crate::batch::{BatchError, BatchEvent};
use crate::models::batch::format_elapsed;

/// Progress and timing of the batch currently (or last) run by an orchestrator.
#[derive(Debug, Default)]
pub struct BatchState {
    running: AtomicBool,
    total: AtomicUsize,
    processed: AtomicUsize,
    started: Mutex<Option<Instant>>,
    last_elapsed: Mutex<Option<Duration>>,
}

impl BatchState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Jobs finished so far in the running batch; zero when idle.
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Time since the running batch started, or the length of the last one.
    pub fn elapsed(&self) -> Duration {
        if let Some(started) = *lock(&self.started) {
            return started.elapsed();
        }
        lock(&self.last_elapsed).unwrap_or_default()
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed())
    }

    pub(crate) fn record_processed(&self) -> usize {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark a batch as started. The returned guard resets everything when
    /// dropped, whichever way the batch ends.
    pub(crate) fn begin(
        self: &Arc<Self>,
        total: usize,
        events: Option<UnboundedSender<BatchEvent>>,
    ) -> Result<ProcessingGuard, BatchError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BatchError::AlreadyRunning);
        }

        self.total.store(total, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        *lock(&self.started) = Some(Instant::now());
        *lock(&self.last_elapsed) = None;

        if let Some(tx) = &events {
            let _ = tx.send(BatchEvent::Started { total });
        }

        Ok(ProcessingGuard {
            state: self.clone(),
            events,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Finalizer for one batch run.
pub(crate) struct ProcessingGuard {
    state: Arc<BatchState>,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let elapsed = lock(&self.state.started)
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        *lock(&self.state.last_elapsed) = Some(elapsed);
        self.state.processed.store(0, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);

        tracing::info!(elapsed = %format_elapsed(elapsed), "Batch finished");

        if let Some(tx) = &self.events {
            let _ = tx.send(BatchEvent::Finished { elapsed });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_resets_state_on_drop() {
        let state = Arc::new(BatchState::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        {
            let _guard = state.begin(5, Some(tx)).unwrap();
            assert!(state.is_running());
            assert_eq!(state.record_processed(), 1);
            assert_eq!(state.processed(), 1);
        }

        assert!(!state.is_running());
        assert_eq!(state.processed(), 0);
        assert_eq!(state.total(), 5);
        assert!(matches!(rx.try_recv(), Ok(BatchEvent::Started { total: 5 })));
        assert!(matches!(rx.try_recv(), Ok(BatchEvent::Finished { .. })));
    }

    #[test]
    fn test_second_begin_is_rejected_while_running() {
        let state = Arc::new(BatchState::default());
        let guard = state.begin(1, None).unwrap();
        assert!(matches!(state.begin(1, None), Err(BatchError::AlreadyRunning)));
        drop(guard);
        assert!(state.begin(1, None).is_ok());
    }

    #[test]
    fn test_guard_runs_during_unwind() {
        let state = Arc::new(BatchState::default());
        let cloned = state.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.begin(1, None).unwrap();
            panic!("job blew up");
        });
        assert!(result.is_err());
        assert!(!state.is_running());
    }
}
