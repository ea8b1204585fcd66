//! The models shared by the job machinery and its callers.
//!
//! Identifiers, the two output formats, submitted requests and the info-query result live here;
//! notifications live in [`notification`].

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod notification;

pub use notification::{Envelope, Notification, NotificationPayload};

/// The opaque identifier of a job, generated at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::Validation(format!("Malformed job id: {}", s)))
    }
}

/// The opaque token a client presents to retrieve an artifact.
///
/// Its text form is 32 hex digits, the same in URLs and in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FetchRef(Uuid);

impl FetchRef {
    /// Generates a fresh random reference.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FetchRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FetchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for FetchRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::NotFound(format!("Unknown download reference: {}", s)))
    }
}

impl From<FetchRef> for String {
    fn from(fetch_ref: FetchRef) -> Self {
        fetch_ref.to_string()
    }
}

impl TryFrom<String> for FetchRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The kind of file a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    /// A video merged into an mp4 container.
    #[serde(alias = "mp4")]
    Video,
    /// Extracted audio converted to mp3.
    #[serde(alias = "mp3")]
    Audio,
}

impl MediaFormat {
    /// The canonical name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Video => "video",
            MediaFormat::Audio => "audio",
        }
    }

    /// The extension of the file the tool produces for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Video => "mp4",
            MediaFormat::Audio => "mp3",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" | "mp4" => Ok(MediaFormat::Video),
            "audio" | "mp3" => Ok(MediaFormat::Audio),
            _ => Err(Error::Validation(
                "Format must be \"video\" or \"audio\"".to_string(),
            )),
        }
    }
}

/// A download request as submitted by a client, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// The URL of the media page.
    pub url: String,
    /// `video` or `audio`.
    pub format: String,
    /// A resolution (`720`, `1080p`, `best`) for video, a tool quality token (`0`-`10`, `192`) for audio.
    pub quality: String,
}

impl JobRequest {
    /// Creates a request from its three parts.
    pub fn new(
        url: impl Into<String>,
        format: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            format: format.into(),
            quality: quality.into(),
        }
    }
}

/// The summary of a video returned by an info query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// The title of the video.
    pub title: String,
    /// The duration in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// The thumbnail URL, usually the highest quality.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// The name of the uploader.
    #[serde(default)]
    pub uploader: Option<String>,
    /// The description of the video.
    #[serde(default)]
    pub description: Option<String>,
    /// The number of views.
    #[serde(default)]
    pub view_count: Option<u64>,
}
