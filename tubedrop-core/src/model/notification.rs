//! Job notifications and their JSON wire form.

use crate::model::{FetchRef, JobId};
use serde::{Deserialize, Serialize, Serializer};

/// A change in a job's state, broadcast to every live subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// The job this notification is about.
    pub job_id: JobId,
    /// What happened.
    pub payload: NotificationPayload,
}

/// The content of a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    /// The job advanced.
    Progress {
        /// Percent complete, between 0 and 100.
        percent: f64,
        /// A human readable status line.
        status: String,
    },
    /// The job finished and its file can be fetched.
    Complete {
        /// The reference to fetch the artifact with.
        fetch_ref: FetchRef,
        /// Where the artifact can be downloaded from.
        download_url: String,
        /// The name the file is served under.
        filename: String,
    },
    /// The job failed.
    Error {
        /// Why it failed.
        error: String,
    },
}

impl Notification {
    /// A progress update.
    pub fn progress(job_id: JobId, percent: f64, status: impl Into<String>) -> Self {
        Self {
            job_id,
            payload: NotificationPayload::Progress {
                percent,
                status: status.into(),
            },
        }
    }

    /// A successful completion.
    pub fn complete(
        job_id: JobId,
        fetch_ref: FetchRef,
        download_url: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            payload: NotificationPayload::Complete {
                fetch_ref,
                download_url: download_url.into(),
                filename: filename.into(),
            },
        }
    }

    /// A failure.
    pub fn error(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            payload: NotificationPayload::Error {
                error: error.into(),
            },
        }
    }

    /// The `type` tag of the notification on the wire.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            NotificationPayload::Progress { .. } => "progress",
            NotificationPayload::Complete { .. } => "complete",
            NotificationPayload::Error { .. } => "error",
        }
    }

    /// Whether this notification ends its job's notification stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.payload, NotificationPayload::Progress { .. })
    }

    /// Converts the notification to its flat JSON envelope.
    pub fn envelope(&self) -> Envelope {
        let mut envelope = Envelope {
            kind: self.kind().to_string(),
            job_id: self.job_id,
            progress: None,
            status: None,
            download_url: None,
            filename: None,
            error: None,
        };

        match &self.payload {
            NotificationPayload::Progress { percent, status } => {
                envelope.progress = Some(*percent);
                envelope.status = Some(status.clone());
            }
            NotificationPayload::Complete {
                download_url,
                filename,
                ..
            } => {
                envelope.progress = Some(100.0);
                envelope.download_url = Some(download_url.clone());
                envelope.filename = Some(filename.clone());
            }
            NotificationPayload::Error { error } => {
                envelope.error = Some(error.clone());
            }
        }

        envelope
    }
}

impl Serialize for Notification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.envelope().serialize(serializer)
    }
}

/// The wire form of a notification: `{type, jobId, progress?, status?, downloadUrl?, filename?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// `progress`, `complete` or `error`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The job the notification is about.
    pub job_id: JobId,
    /// Percent complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Human readable status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Where the finished file can be downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// The name of the finished file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Why the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
