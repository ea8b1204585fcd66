//! Tools for working with the file system.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Returns the name of the given path.
pub fn try_name(path: impl AsRef<Path>) -> Result<String> {
    let name = path
        .as_ref()
        .file_name()
        .ok_or(Error::Path("Failed to get name".to_string()))?;
    let name = name
        .to_str()
        .ok_or(Error::Path("Failed to convert name".to_string()))?;

    Ok(name.to_string())
}

/// Creates a new directory at the given destination.
/// If the directory already exists, nothing is done.
///
/// # Arguments
///
/// * `destination` - The path to create the directory at.
pub fn create_dir(destination: impl AsRef<Path>) -> Result<()> {
    std::fs::create_dir_all(destination)?;
    Ok(())
}

/// Lists the regular files in `dir` whose name starts with `prefix`, sorted by name.
///
/// # Arguments
///
/// * `dir` - The directory to scan.
/// * `prefix` - The file name prefix to look for.
pub async fn files_with_prefix(dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if matches && entry.file_type().await?.is_file() {
            found.push(entry.path());
        }
    }

    found.sort();
    Ok(found)
}

/// Returns the last modification time of a file.
pub async fn modified_at(path: impl AsRef<Path>) -> Result<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

/// Removes a file and logs any errors.
/// Does not propagate errors to avoid interrupting the execution flow.
///
/// # Arguments
///
/// * `file_path` - The path of the file to delete
///
/// # Returns
///
/// `true` if the file was successfully deleted, `false` otherwise
pub async fn remove_file_logged(file_path: impl AsRef<Path> + std::fmt::Debug) -> bool {
    let result = tokio::fs::remove_file(&file_path).await;

    #[cfg(feature = "tracing")]
    match &result {
        Ok(()) => tracing::info!("Cleaned up file: {:?}", file_path),
        Err(e) => tracing::warn!("Failed to clean up file {:?}: {}", file_path, e),
    }

    result.is_ok()
}
