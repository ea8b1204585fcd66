//! Video information lookup.

use crate::error::{Error, Result};
use crate::executor::{Executor, Launcher};
use crate::jobs::args;
use crate::model::VideoInfo;
use crate::utils;
use std::path::Path;
use std::time::Duration;

/// Fetches the title, duration and a few other details of a video without downloading it.
///
/// # Arguments
///
/// * `launcher` - Starts the tool process.
/// * `executable` - The path of the media tool.
/// * `url` - The URL of the video.
/// * `timeout` - How long the tool may run.
///
/// # Errors
///
/// Returns [`Error::Validation`] for an unsupported URL, [`Error::Tool`] if the tool fails, and
/// [`Error::Parse`] if its output is not the expected JSON document.
pub async fn fetch_video_info(
    launcher: &dyn Launcher,
    executable: impl AsRef<Path>,
    url: &str,
    timeout: Duration,
) -> Result<VideoInfo> {
    let url = url.trim();
    if !args::is_supported_url(url) {
        return Err(Error::Validation("Invalid YouTube URL".to_string()));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Fetching video information for {}", url);

    let executor = Executor {
        executable_path: executable.as_ref().to_path_buf(),
        timeout,
        args: utils::to_owned(vec!["--dump-json", "--no-download", "--no-playlist", url]),
    };

    let output = executor.execute(launcher).await.map_err(|e| match e {
        Error::Command(message) => Error::Tool(format!("Failed to get video info: {}", message)),
        other => other,
    })?;

    parse_video_info(&output.stdout)
}

/// Parses the JSON document printed by the tool.
///
/// Only the first non-empty line is considered; the tool prints one document per video.
pub fn parse_video_info(stdout: &str) -> Result<VideoInfo> {
    let document = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::Parse("Empty output".to_string()))?;

    serde_json::from_str(document).map_err(|e| Error::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{OutputLine, ProcessHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Replay {
        lines: Vec<OutputLine>,
        code: i32,
        launches: AtomicUsize,
    }

    impl Replay {
        fn new(lines: Vec<OutputLine>, code: i32) -> Self {
            Self {
                lines,
                code,
                launches: AtomicUsize::new(0),
            }
        }
    }

    impl Launcher for Replay {
        fn launch(&self, _program: &Path, args: &[String]) -> ProcessHandle {
            assert!(args.contains(&"--dump-json".to_string()));
            self.launches.fetch_add(1, Ordering::SeqCst);
            ProcessHandle::scripted(self.lines.clone(), Ok(self.code))
        }
    }

    const URL: &str = "https://youtu.be/abc12345678";

    #[tokio::test]
    async fn info_is_read_from_the_json_document() {
        let document = r#"{"title":"A song","duration":212.0,"thumbnail":"https://i.ytimg.com/a.jpg","uploader":"Someone","view_count":42,"formats":[]}"#;
        let launcher = Replay::new(vec![OutputLine::stdout(document)], 0);

        let info = fetch_video_info(&launcher, "yt-dlp", URL, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(info.title, "A song");
        assert_eq!(info.duration, Some(212.0));
        assert_eq!(info.view_count, Some(42));
        assert_eq!(info.description, None);
    }

    #[tokio::test]
    async fn malformed_output_is_a_parse_error() {
        let launcher = Replay::new(vec![OutputLine::stdout("not json")], 0);

        let error = fetch_video_info(&launcher, "yt-dlp", URL, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Parse(_)));
    }

    #[tokio::test]
    async fn tool_failures_are_tool_errors() {
        let launcher = Replay::new(vec![OutputLine::stderr("ERROR: Video unavailable")], 1);

        let error = fetch_video_info(&launcher, "yt-dlp", URL, Duration::from_secs(5))
            .await
            .unwrap_err();

        match error {
            Error::Tool(message) => assert!(message.contains("Video unavailable")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unsupported_urls_never_launch() {
        let launcher = Replay::new(Vec::new(), 0);

        let error = fetch_video_info(&launcher, "yt-dlp", "https://example.com", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(error.is_validation());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }
}
