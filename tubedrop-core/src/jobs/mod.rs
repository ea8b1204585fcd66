//! Job manager driving one media tool process per download request.
//!
//! This module provides a job manager that:
//! - Validates requests and turns them into tool arguments
//! - Runs every job on its own task, optionally capping concurrent processes
//! - Turns the tool's output into notifications for the hub
//! - Hands finished files over to the artifact store

use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::executor::Launcher;
use crate::hub::NotificationHub;
use crate::model::{FetchRef, JobId, JobRequest, MediaFormat, Notification};
use crate::progress::{ProgressEvent, ProgressParser};
use crate::utils::{self, file_system};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

pub mod args;

/// Status line of the final progress notification.
const COMPLETE_STATUS: &str = "Download complete!";
/// Extensions of the tool's intermediate files.
const PARTIAL_EXTENSIONS: [&str; 4] = ["part", "ytdl", "temp", "tmp"];

/// Job manager configuration
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Path of the media tool executable
    pub executable: PathBuf,
    /// Prefix of the download URLs handed out in completion notifications
    pub download_url_prefix: String,
    /// Stderr prefixes that never count as tool errors
    pub benign_stderr_prefixes: Vec<String>,
    /// Maximum number of tool processes running at once, unbounded if `None`
    pub max_concurrent_jobs: Option<usize>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(utils::find_executable("yt-dlp")),
            download_url_prefix: "/api/file".to_string(),
            benign_stderr_prefixes: Vec::new(),
            max_concurrent_jobs: None,
        }
    }
}

/// Job state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JobState {
    /// Accepted, waiting for the process to start
    Pending,
    /// The tool process is running
    Running,
    /// Job completed
    #[serde(rename_all = "camelCase")]
    Completed {
        /// Reference to fetch the artifact with
        fetch_ref: FetchRef,
        /// Name of the produced file
        filename: String,
    },
    /// Job failed
    Failed {
        /// Reason of failure
        reason: String,
    },
}

impl JobState {
    /// Whether the state can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

/// A point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// The job identifier
    pub id: JobId,
    /// The requested URL
    pub url: String,
    /// The requested format
    pub format: MediaFormat,
    /// The requested quality
    pub quality: String,
    /// The current state
    pub state: JobState,
    /// Last reported percent, never decreasing
    pub percent: f64,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a job's run learned from the tool output.
#[derive(Debug, Default)]
struct RunState {
    last_percent: Option<f64>,
    destination: Option<PathBuf>,
    completed: bool,
    failed: bool,
}

/// Job manager
#[derive(Clone)]
pub struct JobManager {
    /// Job manager configuration
    config: Arc<JobConfig>,
    /// Starts the tool processes
    launcher: Arc<dyn Launcher>,
    /// Receives every notification
    hub: NotificationHub,
    /// Receives every finished file
    store: ArtifactStore,
    /// Classifies output lines
    parser: ProgressParser,
    /// Job registry
    jobs: Arc<Mutex<HashMap<JobId, JobSnapshot>>>,
    /// Semaphore to limit the number of running processes
    semaphore: Option<Arc<Semaphore>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl JobManager {
    /// Creates a manager publishing to `hub` and registering files in `store`.
    pub fn new(
        config: JobConfig,
        launcher: Arc<dyn Launcher>,
        hub: NotificationHub,
        store: ArtifactStore,
    ) -> Self {
        let parser = ProgressParser::new(config.benign_stderr_prefixes.clone());
        let semaphore = config
            .max_concurrent_jobs
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        Self {
            config: Arc::new(config),
            launcher,
            hub,
            store,
            parser,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            semaphore,
        }
    }

    /// Validates a request and starts a job for it.
    ///
    /// The job runs in the background; follow it through the hub or [`JobManager::status`].
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Validation`] if the request is invalid. No process is started
    /// in that case.
    pub async fn create_job(&self, request: JobRequest) -> Result<JobId> {
        let valid = args::validate(&request)?;
        let job_id = JobId::new();

        let template = self.store.root().join(format!("{}.%(ext)s", job_id));
        let tool_args = args::build_args(
            valid.format,
            &valid.quality,
            &template.to_string_lossy(),
            &valid.url,
        );

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Created job {} for {} ({}, {})",
            job_id,
            valid.url,
            valid.format,
            request.quality
        );

        // Register the job
        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(
                job_id,
                JobSnapshot {
                    id: job_id,
                    url: valid.url,
                    format: valid.format,
                    quality: request.quality.trim().to_string(),
                    state: JobState::Pending,
                    percent: 0.0,
                    created_at: Utc::now(),
                    finished_at: None,
                },
            );
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_job(job_id, valid.format, tool_args).await;
        });

        Ok(job_id)
    }

    async fn run_job(&self, job_id: JobId, format: MediaFormat, tool_args: Vec<String>) {
        // The permit is released when the job ends
        let _permit = match &self.semaphore {
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        };

        let mut handle = self.launcher.launch(&self.config.executable, &tool_args);
        self.set_running(job_id).await;

        let mut run = RunState::default();
        while let Some(line) = handle.next_line().await {
            #[cfg(feature = "tracing")]
            tracing::trace!("[{}] {}: {}", job_id, line.stream, line.text);

            // Drain the rest of the output once the job failed
            if run.failed {
                continue;
            }

            match self.parser.parse(&line) {
                Some(ProgressEvent::Progress { percent, message }) => {
                    if run.last_percent.is_some_and(|last| percent <= last) {
                        continue;
                    }
                    run.last_percent = Some(percent);
                    self.report_progress(job_id, percent, message).await;
                }
                Some(ProgressEvent::FilenameDiscovered(path)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Job {} writes to {:?}", job_id, path);

                    run.destination = Some(path);
                }
                Some(ProgressEvent::Completed) => {
                    if !run.completed {
                        run.completed = true;
                        run.last_percent = Some(100.0);
                        self.report_progress(job_id, 100.0, COMPLETE_STATUS.to_string())
                            .await;
                    }
                }
                Some(ProgressEvent::ToolError(message)) => {
                    run.failed = true;
                    self.fail(job_id, message).await;
                }
                None => {}
            }
        }

        let completion = handle.wait().await;
        if run.failed {
            self.remove_partial_files(job_id).await;
            return;
        }

        match completion {
            Ok(0) => match self.resolve_output(job_id, format, run.destination).await {
                Some(path) => self.complete(job_id, path).await,
                None => {
                    self.fail(job_id, "Download completed but file not found")
                        .await
                }
            },
            Ok(code) => {
                self.fail(job_id, format!("Download failed with exit code {}", code))
                    .await;
                self.remove_partial_files(job_id).await;
            }
            Err(e) => {
                self.fail(job_id, e.to_string()).await;
                self.remove_partial_files(job_id).await;
            }
        }
    }

    async fn set_running(&self, job_id: JobId) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.state == JobState::Pending {
                job.state = JobState::Running;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Job {} is running", job_id);
    }

    async fn report_progress(&self, job_id: JobId, percent: f64, message: String) {
        // Update status
        {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(&job_id) {
                Some(job) if !job.state.is_terminal() => job.percent = percent,
                _ => return,
            }
        }

        self.hub
            .publish(Notification::progress(job_id, percent, message));
    }

    /// Moves the job to a terminal state. Returns `false` if it already was terminal.
    async fn finish(&self, job_id: JobId, state: JobState) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return false;
        };
        if job.state.is_terminal() {
            return false;
        }

        if matches!(state, JobState::Completed { .. }) {
            job.percent = 100.0;
        }
        job.state = state;
        job.finished_at = Some(Utc::now());
        true
    }

    async fn fail(&self, job_id: JobId, reason: impl Into<String>) {
        let reason = reason.into();

        #[cfg(feature = "tracing")]
        tracing::warn!("Job {} failed: {}", job_id, reason);

        let state = JobState::Failed {
            reason: reason.clone(),
        };
        if self.finish(job_id, state).await {
            self.hub.publish(Notification::error(job_id, reason));
        }
    }

    async fn complete(&self, job_id: JobId, path: PathBuf) {
        let filename = match file_system::try_name(&path) {
            Ok(filename) => filename,
            Err(e) => {
                self.fail(job_id, e.to_string()).await;
                return;
            }
        };

        let fetch_ref = self.store.register(job_id, &path, filename.clone());
        let download_url = format!(
            "{}/{}",
            self.config.download_url_prefix.trim_end_matches('/'),
            fetch_ref
        );

        let state = JobState::Completed {
            fetch_ref,
            filename: filename.clone(),
        };
        if self.finish(job_id, state).await {
            #[cfg(feature = "tracing")]
            tracing::info!("Job {} completed: {}", job_id, filename);

            self.hub.publish(Notification::complete(
                job_id,
                fetch_ref,
                download_url,
                filename,
            ));
        }
    }

    /// Finds the file a successful run produced.
    ///
    /// The announced destination is looked up by name in the downloads directory. Failing that,
    /// the directory is scanned for `<job_id>.*`, preferring the format's extension.
    async fn resolve_output(
        &self,
        job_id: JobId,
        format: MediaFormat,
        destination: Option<PathBuf>,
    ) -> Option<PathBuf> {
        if let Some(name) = destination.as_deref().and_then(Path::file_name) {
            let rebased = self.store.root().join(name);
            if !is_partial(&rebased) && is_file(&rebased).await {
                return Some(rebased);
            }
        }

        let candidates = file_system::files_with_prefix(self.store.root(), &format!("{}.", job_id))
            .await
            .ok()?;
        let complete = candidates
            .into_iter()
            .filter(|path| !is_partial(path))
            .collect::<Vec<_>>();

        complete
            .iter()
            .find(|path| {
                path.extension()
                    .is_some_and(|extension| extension == format.extension())
            })
            .or_else(|| complete.first())
            .cloned()
    }

    async fn remove_partial_files(&self, job_id: JobId) {
        let prefix = format!("{}.", job_id);
        if let Ok(leftovers) = file_system::files_with_prefix(self.store.root(), &prefix).await {
            for path in leftovers {
                file_system::remove_file_logged(&path).await;
            }
        }
    }

    /// Get the status of a job
    ///
    /// # Arguments
    ///
    /// * `job_id` - The ID of the job
    ///
    /// # Returns
    ///
    /// A snapshot of the job, or None if the ID doesn't exist
    pub async fn status(&self, job_id: JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        jobs.get(&job_id).cloned()
    }

    /// Wait for a job to reach a terminal state
    ///
    /// # Arguments
    ///
    /// * `job_id` - The ID of the job to wait for
    ///
    /// # Returns
    ///
    /// The final state, or None if the ID doesn't exist
    pub async fn wait_for_completion(&self, job_id: JobId) -> Option<JobState> {
        loop {
            let job = self.status(job_id).await?;

            if job.state.is_terminal() {
                return Some(job.state);
            }

            // Wait a little before checking again
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// The number of jobs that are not finished yet.
    pub async fn active_jobs(&self) -> usize {
        let jobs = self.jobs.lock().await;
        jobs.values().filter(|job| !job.state.is_terminal()).count()
    }

    /// Forgets finished jobs that ended more than `older_than` ago.
    ///
    /// # Returns
    ///
    /// The number of jobs removed
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let Ok(older_than) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - older_than;

        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.finished_at.is_none_or(|finished| finished > cutoff));
        before - jobs.len()
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| PARTIAL_EXTENSIONS.contains(&extension))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}
