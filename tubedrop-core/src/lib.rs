#![doc = include_str!("../README.md")]

use crate::artifacts::{ArtifactConfig, ArtifactStore, FetchedArtifact, SweepReport};
use crate::error::Result;
use crate::executor::{Launcher, SystemLauncher};
use crate::hub::{NotificationHub, Subscription};
use crate::jobs::{JobConfig, JobManager, JobSnapshot};
use crate::model::{FetchRef, JobId, JobRequest, VideoInfo};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod artifacts;
pub mod error;
pub mod executor;
pub mod hub;
pub mod info;
pub mod jobs;
pub mod model;
pub mod progress;
pub mod utils;

/// A download service that runs yt-dlp jobs, broadcasts their progress and serves the results.
///
/// The service is made of a [`JobManager`], a [`NotificationHub`] and an [`ArtifactStore`] sharing
/// one downloads directory. Cloning it yields another handle on the same service.
///
/// # Examples
///
/// ```rust, no_run
/// # use tubedrop_core::Tubedrop;
/// # use tubedrop_core::artifacts::ArtifactConfig;
/// # use tubedrop_core::jobs::JobConfig;
/// # use tubedrop_core::model::JobRequest;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = Tubedrop::new("downloads", JobConfig::default(), ArtifactConfig::default())?;
/// let mut subscription = service.subscribe();
///
/// let request = JobRequest::new("https://youtu.be/dQw4w9WgXcQ", "audio", "192");
/// let job_id = service.submit(request).await?;
///
/// while let Some(notification) = subscription.recv().await {
///     println!("{}", serde_json::to_string(&notification)?);
///     if notification.job_id == job_id && notification.is_terminal() {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Tubedrop {
    /// Starts the yt-dlp processes.
    pub launcher: Arc<dyn Launcher>,
    /// Runs the jobs.
    pub jobs: JobManager,
    /// Broadcasts the notifications of every job.
    pub hub: NotificationHub,
    /// Holds the finished files.
    pub artifacts: ArtifactStore,
    /// The path of the yt-dlp executable.
    pub executable: PathBuf,
    /// The timeout of info queries.
    pub info_timeout: Duration,
}

impl fmt::Display for Tubedrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tubedrop: downloads_dir={:?}, executable={:?}",
            self.artifacts.root(),
            self.executable
        )
    }
}

impl fmt::Debug for Tubedrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tubedrop")
            .field("jobs", &self.jobs)
            .field("hub", &self.hub)
            .field("executable", &self.executable)
            .field("info_timeout", &self.info_timeout)
            .finish_non_exhaustive()
    }
}

impl Tubedrop {
    /// Creates a service running real yt-dlp processes.
    ///
    /// # Arguments
    ///
    /// * `downloads_dir` - The directory the files are downloaded to, created if missing.
    /// * `jobs` - The job manager configuration.
    /// * `artifacts` - How long finished files are kept.
    ///
    /// # Errors
    ///
    /// This function will return an error if the downloads directory could not be created.
    pub fn new(
        downloads_dir: impl AsRef<Path>,
        jobs: JobConfig,
        artifacts: ArtifactConfig,
    ) -> Result<Self> {
        Self::with_launcher(Arc::new(SystemLauncher), downloads_dir, jobs, artifacts)
    }

    /// Creates a service starting its processes through `launcher`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the downloads directory could not be created.
    pub fn with_launcher(
        launcher: Arc<dyn Launcher>,
        downloads_dir: impl AsRef<Path>,
        jobs: JobConfig,
        artifacts: ArtifactConfig,
    ) -> Result<Self> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Creating a new download service in {:?}", downloads_dir.as_ref());

        let store = ArtifactStore::new(downloads_dir, artifacts)?;
        let hub = NotificationHub::new();
        let executable = jobs.executable.clone();
        let manager = JobManager::new(jobs, Arc::clone(&launcher), hub.clone(), store.clone());

        Ok(Self {
            launcher,
            jobs: manager,
            hub,
            artifacts: store,
            executable,
            info_timeout: Duration::from_secs(30),
        })
    }

    /// Sets the timeout of info queries.
    pub fn with_info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    /// Starts a download job. See [`JobManager::create_job`].
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        self.jobs.create_job(request).await
    }

    /// Returns a snapshot of a job.
    pub async fn job(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.jobs.status(job_id).await
    }

    /// Joins the notification stream.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Opens a finished file. See [`ArtifactStore::fetch`].
    pub async fn fetch(&self, fetch_ref: &FetchRef) -> Result<FetchedArtifact> {
        self.artifacts.fetch(fetch_ref).await
    }

    /// Fetches information about a video without downloading it.
    pub async fn video_info(&self, url: &str) -> Result<VideoInfo> {
        info::fetch_video_info(
            self.launcher.as_ref(),
            &self.executable,
            url,
            self.info_timeout,
        )
        .await
    }

    /// Sweeps old files and forgets jobs that finished before the retention window.
    pub async fn maintain(&self) -> SweepReport {
        let report = self.artifacts.sweep().await;
        let _pruned = self
            .jobs
            .prune_finished(self.artifacts.config().retention)
            .await;

        #[cfg(feature = "tracing")]
        if _pruned > 0 {
            tracing::debug!("Pruned {} finished jobs", _pruned);
        }

        report
    }

    /// Runs [`Tubedrop::maintain`] every `interval`, starting after the first interval.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                service.maintain().await;
            }
        })
    }
}
