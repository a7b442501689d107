//! Output file naming: sanitising model text into a base name, disambiguating
//! repeats within a batch, and probing the output folder for collisions.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Name used when sanitising leaves nothing behind.
pub const FALLBACK_NAME: &str = "image";

/// Upper bound on `_N` suffixes tried against the filesystem.
pub const MAX_DISK_PROBES: u32 = 10_000;

static WHITESPACE: OnceLock<Regex> = OnceLock::new();
static DISALLOWED: OnceLock<Regex> = OnceLock::new();
static UNDERSCORES: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("Invalid regex"))
}

/// Turn arbitrary text into a safe base file name.
///
/// Whitespace runs become `_`, anything outside the Unicode letter (`L`) and
/// number (`N`) categories or `_` is dropped, so combining marks go too.
/// Repeated `_` collapse to one and leading/trailing `_` are trimmed.
/// Never returns an empty string.
pub fn sanitize(text: &str) -> String {
    let spaced = pattern(&WHITESPACE, r"\s+").replace_all(text, "_");
    let filtered = pattern(&DISALLOWED, r"[^\p{L}\p{N}_]").replace_all(&spaced, "");
    let collapsed = pattern(&UNDERSCORES, r"_+").replace_all(&filtered, "_");

    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Per-batch table of base names already handed out.
#[derive(Debug, Default)]
pub struct UsedNameTable {
    counts: Mutex<HashMap<String, usize>>,
}

impl UsedNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First call for a base returns it unchanged; the Nth repeat returns
    /// `base_{N-1}`. The read-increment-write happens under one lock.
    pub fn allocate(&self, base: &str) -> String {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let counter = counts.entry(base.to_string()).or_insert(0);
        let previous = *counter;
        *counter += 1;

        if previous == 0 {
            base.to_string()
        } else {
            format!("{}_{}", base, previous)
        }
    }
}

/// Join `base` and `extension` (with or without the leading dot).
pub fn file_name(base: &str, extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        base.to_string()
    } else {
        format!("{}.{}", base, ext)
    }
}

/// Return a path in `directory` for `base` + `extension` that does not exist
/// on disk, appending `_1`, `_2`, ... as needed.
pub fn ensure_unique_on_disk(
    directory: &Path,
    base: &str,
    extension: &str,
) -> Result<PathBuf, NamingError> {
    ensure_unique_with(directory, base, extension, |path| path.exists())
}

fn ensure_unique_with<F>(
    directory: &Path,
    base: &str,
    extension: &str,
    is_taken: F,
) -> Result<PathBuf, NamingError>
where
    F: Fn(&Path) -> bool,
{
    let candidate = directory.join(file_name(base, extension));
    if !is_taken(&candidate) {
        return Ok(candidate);
    }

    for counter in 1..=MAX_DISK_PROBES {
        let candidate = directory.join(file_name(&format!("{}_{}", base, counter), extension));
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }

    Err(NamingError::ProbeLimit {
        directory: directory.to_path_buf(),
        base: base.to_string(),
        attempts: MAX_DISK_PROBES,
    })
}

/// Async [`ensure_unique_on_disk`], run on the blocking pool.
pub async fn unique_on_disk(
    directory: PathBuf,
    base: String,
    extension: String,
) -> Result<PathBuf, NamingError> {
    tokio::task::spawn_blocking(move || ensure_unique_on_disk(&directory, &base, &extension))
        .await?
}

/// Batch-scoped namer combining the in-memory table with disk probing.
///
/// Paths handed out are remembered, so two concurrent jobs cannot be given
/// the same destination even before either file has been written. Clones
/// share the same table.
#[derive(Debug, Default, Clone)]
pub struct OutputNamer {
    inner: Arc<NamerState>,
}

#[derive(Debug, Default)]
struct NamerState {
    used: UsedNameTable,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl OutputNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a unique destination in `directory` for a sanitised base name.
    ///
    /// Disk probing can touch thousands of paths, so it runs on the blocking
    /// pool rather than on the calling worker.
    pub async fn claim(
        &self,
        directory: &Path,
        base: &str,
        extension: &str,
    ) -> Result<PathBuf, NamingError> {
        let namer = self.clone();
        let directory = directory.to_path_buf();
        let base = base.to_string();
        let extension = extension.to_string();

        tokio::task::spawn_blocking(move || namer.claim_now(&directory, &base, &extension)).await?
    }

    fn claim_now(
        &self,
        directory: &Path,
        base: &str,
        extension: &str,
    ) -> Result<PathBuf, NamingError> {
        let unique_base = self.inner.used.allocate(base);

        let mut claimed = self.inner.claimed.lock().unwrap_or_else(|e| e.into_inner());
        let path = ensure_unique_with(directory, &unique_base, extension, |path| {
            claimed.contains(path) || path.exists()
        })?;
        claimed.insert(path.clone());
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error("No free name for '{base}' in {directory:?} after {attempts} attempts")]
    ProbeLimit {
        directory: PathBuf,
        base: String,
        attempts: u32,
    },

    #[error("Name lookup task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
