//! API credential lifecycle for one batch run.
//!
//! Two issuance strategies live here and are not layered:
//! - adaptive: `take_available` / `mark_success` / `mark_exhausted` track
//!   which credentials have hit their quota;
//! - round-robin: `next_round_robin_index` hands out starting slots for
//!   parallel workers without consulting exhaustion state.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct PoolState {
    all: Vec<String>,
    available: VecDeque<String>,
    exhausted: Vec<String>,
}

/// Pool of API credentials shared by every worker of a batch.
#[derive(Debug, Default)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
    cursor: AtomicUsize,
    len: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<String>) -> Self {
        let pool = Self::default();
        pool.configure(credentials);
        pool
    }

    /// Replace the pool. Blank entries are dropped; every credential starts
    /// available and the round-robin cursor goes back to zero.
    pub fn configure(&self, credentials: Vec<String>) {
        let all: Vec<String> = credentials
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let mut state = self.lock();
        state.available = all.iter().cloned().collect();
        state.exhausted.clear();
        state.all = all;
        self.len.store(state.all.len(), Ordering::SeqCst);
        self.cursor.store(0, Ordering::SeqCst);

        tracing::info!(count = state.all.len(), "API credentials configured");
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Credential at a position in the configured order.
    pub fn credential_at(&self, index: usize) -> Option<String> {
        let state = self.lock();
        if state.all.is_empty() {
            return None;
        }
        state.all.get(index % state.all.len()).cloned()
    }

    /// Position of a credential in the configured order, used for logging.
    pub fn index_of(&self, credential: &str) -> Option<usize> {
        self.lock().all.iter().position(|c| c == credential)
    }

    /// Next round-robin slot. Returns 0 when the pool is empty.
    pub fn next_round_robin_index(&self) -> usize {
        let n = self.len();
        if n == 0 {
            return 0;
        }
        self.cursor.fetch_add(1, Ordering::SeqCst) % n
    }

    /// Pop the head of the available queue.
    ///
    /// When nothing is available but some credentials are exhausted, the
    /// exhausted set is treated as transient and moved back in full.
    pub fn take_available(&self) -> Option<String> {
        let mut state = self.lock();
        if state.available.is_empty() {
            if state.exhausted.is_empty() {
                return None;
            }
            let recovered: Vec<String> = state.exhausted.drain(..).collect();
            state.available.extend(recovered);
            tracing::info!(
                available = state.available.len(),
                "All credentials were exhausted, resetting pool"
            );
        }
        state.available.pop_front()
    }

    /// Return a credential to the back of the available queue.
    pub fn mark_success(&self, credential: &str) {
        let mut state = self.lock();
        state.exhausted.retain(|c| c != credential);
        state.available.retain(|c| c != credential);
        state.available.push_back(credential.to_string());
    }

    /// Quarantine a credential after a quota error.
    pub fn mark_exhausted(&self, credential: &str) {
        let mut state = self.lock();
        state.available.retain(|c| c != credential);
        if !state.exhausted.iter().any(|c| c == credential) {
            state.exhausted.push(credential.to_string());
        }
        tracing::warn!(
            available = state.available.len(),
            exhausted = state.exhausted.len(),
            "Credential marked as exhausted"
        );
    }

    /// `(available, exhausted)` counts.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.available.len(), state.exhausted.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Newline-delimited credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load credentials, skipping blank lines. A missing file is empty.
    pub async fn load(&self) -> Result<Vec<String>, CredentialStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_credentials(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CredentialStoreError::Read(self.path.clone(), e)),
        }
    }

    pub async fn save(&self, credentials: &[String]) -> Result<(), CredentialStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CredentialStoreError::Write(self.path.clone(), e))?;
            }
        }
        let content = credentials
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| CredentialStoreError::Write(self.path.clone(), e))
    }
}

/// Split on any newline style and drop blank entries.
pub fn parse_credentials(content: &str) -> Vec<String> {
    content
        .split(['\r', '\n'])
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("Failed to read credentials from {0:?}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to write credentials to {0:?}: {1}")]
    Write(PathBuf, #[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{}", i)).collect()
    }

    #[test]
    fn test_configure_drops_blank_entries() {
        let pool = CredentialPool::new(vec!["a".into(), "  ".into(), "".into(), "b".into()]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.counts(), (2, 0));
    }

    #[test]
    fn test_take_available_in_order() {
        let pool = CredentialPool::new(keys(3));
        assert_eq!(pool.take_available().as_deref(), Some("key-0"));
        assert_eq!(pool.take_available().as_deref(), Some("key-1"));
        pool.mark_success("key-0");
        assert_eq!(pool.take_available().as_deref(), Some("key-2"));
        assert_eq!(pool.take_available().as_deref(), Some("key-0"));
    }

    #[test]
    fn test_exhausting_everything_triggers_reset() {
        let pool = CredentialPool::new(keys(2));
        for _ in 0..2 {
            let key = pool.take_available().unwrap();
            pool.mark_exhausted(&key);
        }
        assert_eq!(pool.counts(), (0, 2));

        let recovered = pool.take_available();
        assert_eq!(recovered.as_deref(), Some("key-0"));
        assert_eq!(pool.counts(), (1, 0));
    }

    #[test]
    fn test_empty_pool_has_no_credential() {
        let pool = CredentialPool::new(Vec::new());
        assert!(pool.is_empty());
        assert_eq!(pool.take_available(), None);
        assert_eq!(pool.next_round_robin_index(), 0);
        assert_eq!(pool.credential_at(0), None);
    }

    #[test]
    fn test_marks_are_idempotent_and_disjoint() {
        let pool = CredentialPool::new(keys(3));
        pool.mark_exhausted("key-1");
        pool.mark_exhausted("key-1");
        assert_eq!(pool.counts(), (2, 1));

        pool.mark_success("key-1");
        pool.mark_success("key-1");
        assert_eq!(pool.counts(), (3, 0));

        // key-1 went to the back of the queue.
        assert_eq!(pool.take_available().as_deref(), Some("key-0"));
        assert_eq!(pool.take_available().as_deref(), Some("key-2"));
        assert_eq!(pool.take_available().as_deref(), Some("key-1"));
    }

    #[test]
    fn test_configure_resets_state() {
        let pool = CredentialPool::new(keys(2));
        pool.mark_exhausted("key-0");
        pool.next_round_robin_index();

        pool.configure(keys(3));
        assert_eq!(pool.counts(), (3, 0));
        assert_eq!(pool.next_round_robin_index(), 0);
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = CredentialPool::new(keys(3));
        let slots: Vec<usize> = (0..7).map(|_| pool.next_round_robin_index()).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_round_robin_is_balanced_across_threads() {
        let pool = Arc::new(CredentialPool::new(keys(4)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| pool.next_round_robin_index())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = [0usize; 4];
        for handle in handles {
            for slot in handle.join().unwrap() {
                counts[slot] += 1;
            }
        }
        assert_eq!(counts, [200, 200, 200, 200]);
    }

    #[tokio::test]
    async fn test_store_round_trip_filters_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested/apikeys.txt"));

        assert!(store.load().await.unwrap().is_empty());

        store
            .save(&["first".into(), " ".into(), "second".into()])
            .await
            .unwrap();
        assert_eq!(store.load().await.unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_store_unreadable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let result = tokio_test::block_on(store.load());
        tokio_test::assert_err!(&result);
        assert!(matches!(result, Err(CredentialStoreError::Read(..))));
    }

    #[test]
    fn test_parse_mixed_newlines() {
        assert_eq!(
            parse_credentials("a\r\nb\n\n  \rc\rd\n"),
            vec!["a", "b", "c", "d"]
        );
    }
}
