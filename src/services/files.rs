use std::path::{Path, PathBuf};

/// List files in `folder` whose extension is in `allowlist`.
///
/// Matching is case-insensitive and tolerates allowlist entries with or
/// without the leading dot. A missing folder yields an empty list. Results
/// are sorted so batches run in a stable input order.
pub async fn list_images(folder: &Path, allowlist: &[String]) -> Result<Vec<PathBuf>, FileError> {
    if !tokio::fs::try_exists(folder).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let allowed: Vec<String> = allowlist
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();

    let mut entries = tokio::fs::read_dir(folder)
        .await
        .map_err(|e| FileError::ReadDir(folder.to_path_buf(), e))?;

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FileError::ReadDir(folder.to_path_buf(), e))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let matches = extension_of(&path)
            .map(|ext| allowed.iter().any(|a| *a == ext))
            .unwrap_or(false);
        if matches {
            images.push(path);
        }
    }

    images.sort();
    Ok(images)
}

/// Copy `source` to `destination`, creating the destination folder if needed.
pub async fn copy_file(source: &Path, destination: &Path, overwrite: bool) -> Result<(), FileError> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FileError::CreateDir(parent.to_path_buf(), e))?;
        }
    }

    if !overwrite && tokio::fs::try_exists(destination).await.unwrap_or(false) {
        return Err(FileError::AlreadyExists(destination.to_path_buf()));
    }

    tokio::fs::copy(source, destination)
        .await
        .map_err(|e| FileError::Copy {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            error: e,
        })?;
    Ok(())
}

/// Lower-cased extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Final path component as a string.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Extension with its leading dot as it appears on disk, or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("Failed to read directory {0:?}: {1}")]
    ReadDir(PathBuf, #[source] std::io::Error),

    #[error("Failed to create directory {0:?}: {1}")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("Destination already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error("Failed to copy {source_path:?} to {destination:?}: {error}")]
    Copy {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to read image {0:?}: {1}")]
    ReadImage(PathBuf, #[source] std::io::Error),
}
