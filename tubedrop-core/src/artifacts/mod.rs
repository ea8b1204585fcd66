//! The registry of finished files waiting to be fetched.
//!
//! A registered artifact lives until the first of: its cleanup timer fires, a sweep finds it older
//! than the retention window, or a fetch finds its file gone. Whoever removes the entry owns the
//! deletion of the file, so a file is never deleted twice.

use crate::error::{Error, Result};
use crate::model::{FetchRef, JobId};
use crate::utils::file_system;
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::io::ReaderStream;

/// How long artifacts are kept.
#[derive(Constructor, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactConfig {
    /// Delay after registration before the file is deleted.
    pub cleanup_delay: Duration,
    /// Age after which a sweep deletes a file.
    pub retention: Duration,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            cleanup_delay: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// A registered artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// The job that produced the file.
    pub job_id: JobId,
    /// The reference clients fetch the file with.
    pub fetch_ref: FetchRef,
    /// Where the file is on disk.
    pub file_path: PathBuf,
    /// The name the file is served under.
    pub filename: String,
    /// When the file was registered.
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    artifact: Artifact,
    cleanup: Option<AbortHandle>,
}

impl Entry {
    fn cancel_cleanup(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}

/// An opened artifact, ready to be streamed.
#[derive(Debug)]
pub struct FetchedArtifact {
    /// The name the file is served under.
    pub filename: String,
    /// The size of the file in bytes.
    pub len: u64,
    /// The open file.
    pub file: tokio::fs::File,
}

impl FetchedArtifact {
    /// Turns the file into a stream of byte chunks.
    pub fn into_stream(self) -> ReaderStream<tokio::fs::File> {
        ReaderStream::new(self.file)
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Registered artifacts dropped for being older than the retention window.
    pub expired: usize,
    /// Unregistered files deleted from the downloads directory.
    pub orphans: usize,
}

/// Maps fetch references to files in the downloads directory.
///
/// Cloning the store yields another handle on the same registry.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    config: ArtifactConfig,
    entries: Arc<Mutex<HashMap<FetchRef, Entry>>>,
}

impl ArtifactStore {
    /// Creates a store for the files in `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// This function will return an error if the directory could not be created.
    pub fn new(root: impl AsRef<Path>, config: ArtifactConfig) -> Result<Self> {
        file_system::create_dir(&root)?;

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The downloads directory this store manages.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The retention settings of this store.
    pub fn config(&self) -> ArtifactConfig {
        self.config
    }

    /// Registers a finished file and arms its cleanup timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        job_id: JobId,
        file_path: impl Into<PathBuf>,
        filename: impl Into<String>,
    ) -> FetchRef {
        self.register_at(job_id, file_path.into(), filename.into(), Utc::now())
    }

    pub(crate) fn register_at(
        &self,
        job_id: JobId,
        file_path: PathBuf,
        filename: String,
        registered_at: DateTime<Utc>,
    ) -> FetchRef {
        let fetch_ref = FetchRef::new();

        #[cfg(feature = "tracing")]
        tracing::info!("Registered {:?} as {} for job {}", file_path, fetch_ref, job_id);

        let artifact = Artifact {
            job_id,
            fetch_ref,
            file_path,
            filename,
            registered_at,
        };
        self.entries.lock().insert(
            fetch_ref,
            Entry {
                artifact,
                cleanup: None,
            },
        );

        let entries = Arc::clone(&self.entries);
        let delay = self.config.cleanup_delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let removed = entries.lock().remove(&fetch_ref);
            if let Some(entry) = removed {
                #[cfg(feature = "tracing")]
                tracing::debug!("Cleanup delay elapsed for {}", fetch_ref);

                file_system::remove_file_logged(&entry.artifact.file_path).await;
            }
        });

        if let Some(entry) = self.entries.lock().get_mut(&fetch_ref) {
            entry.cleanup = Some(timer.abort_handle());
        }

        fetch_ref
    }

    /// Looks up a registered artifact without touching the file system.
    pub fn get(&self, fetch_ref: &FetchRef) -> Option<Artifact> {
        self.entries
            .lock()
            .get(fetch_ref)
            .map(|entry| entry.artifact.clone())
    }

    /// Opens the file behind `fetch_ref`.
    ///
    /// A reference whose file vanished from disk is unregistered on the spot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the reference is unknown, expired, or its file is gone.
    pub async fn fetch(&self, fetch_ref: &FetchRef) -> Result<FetchedArtifact> {
        let (file_path, filename) = match self.entries.lock().get(fetch_ref) {
            Some(entry) => (
                entry.artifact.file_path.clone(),
                entry.artifact.filename.clone(),
            ),
            None => return Err(not_found(fetch_ref)),
        };

        let file = match tokio::fs::File::open(&file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                #[cfg(feature = "tracing")]
                tracing::warn!("File of {} is gone: {:?}", fetch_ref, file_path);

                if let Some(mut entry) = self.entries.lock().remove(fetch_ref) {
                    entry.cancel_cleanup();
                }
                return Err(not_found(fetch_ref));
            }
            Err(e) => return Err(Error::IO(e)),
        };

        let len = file.metadata().await?.len();
        Ok(FetchedArtifact {
            filename,
            len,
            file,
        })
    }

    /// Deletes expired artifacts and stale unregistered files.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);

        let expired: Vec<Entry> = {
            let mut entries = self.entries.lock();
            let stale: Vec<FetchRef> = entries
                .iter()
                .filter(|(_, entry)| now - entry.artifact.registered_at > retention)
                .map(|(fetch_ref, _)| *fetch_ref)
                .collect();

            stale
                .into_iter()
                .filter_map(|fetch_ref| entries.remove(&fetch_ref))
                .collect()
        };

        let mut report = SweepReport {
            expired: expired.len(),
            orphans: 0,
        };

        for mut entry in expired {
            entry.cancel_cleanup();
            file_system::remove_file_logged(&entry.artifact.file_path).await;
        }

        match self.stale_orphans(now, retention).await {
            Ok(orphans) => {
                for path in orphans {
                    if file_system::remove_file_logged(&path).await {
                        report.orphans += 1;
                    }
                }
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to scan {:?} for old files: {}", self.root, _e);
            }
        }

        #[cfg(feature = "tracing")]
        if report != SweepReport::default() {
            tracing::info!(
                "Sweep removed {} expired artifacts and {} old files",
                report.expired,
                report.orphans
            );
        }

        report
    }

    async fn stale_orphans(
        &self,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Result<Vec<PathBuf>> {
        let mut stale = Vec::new();

        for path in file_system::files_with_prefix(&self.root, "").await? {
            let modified = match file_system::modified_at(&path).await {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if now - modified <= retention || self.is_registered(&path) {
                continue;
            }
            stale.push(path);
        }

        Ok(stale)
    }

    fn is_registered(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .values()
            .any(|entry| entry.artifact.file_path == path)
    }

    /// The number of registered artifacts.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no artifact is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn not_found(fetch_ref: &FetchRef) -> Error {
    Error::NotFound(format!("No download for reference {}", fetch_ref))
}
