//! Classification of the media tool's output lines.
//!
//! Each fully delimited line is turned into at most one [`ProgressEvent`]. Unrecognised lines are
//! ignored, a line never fails to parse.

use crate::executor::{OutputLine, OutputStream};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[\w-]+\]\s+(\d+(?:\.\d+)?)%").unwrap());
static DESTINATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?:download|ExtractAudio)\] Destination: (.+)$").unwrap());
static MERGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).unwrap());

/// The literal marker printed once the last byte has been fetched.
const COMPLETE_MARKER: &str = "[download] 100%";
/// Printed instead of progress when the file is already present.
const ALREADY_DOWNLOADED: &str = "has already been downloaded";

/// A structured event extracted from one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The tool reported how far it got.
    Progress {
        /// Percent complete, between 0 and 100.
        percent: f64,
        /// A human readable status line.
        message: String,
    },
    /// The tool announced the file it is writing.
    FilenameDiscovered(PathBuf),
    /// The tool finished fetching the media.
    Completed,
    /// The tool reported an error on stderr.
    ToolError(String),
}

/// Classifies a single output line.
///
/// Recognised, in order:
/// 1. the completion marker `[download] 100%` or an "already downloaded" notice, as
///    [`ProgressEvent::Completed`];
/// 2. a percentage marker `[<tag>] <number>%`, as [`ProgressEvent::Progress`];
/// 3. a destination marker (`[download] Destination:`, `[ExtractAudio] Destination:` or
///    `[Merger] Merging formats into "..."`), as [`ProgressEvent::FilenameDiscovered`];
/// 4. a stderr line mentioning `error` or `failed` in any case, as [`ProgressEvent::ToolError`].
///
/// The completion marker is itself a percentage marker, so it is checked first.
pub fn parse_line(line: &OutputLine) -> Option<ProgressEvent> {
    let text = line.text.trim_end();

    if line.stream == OutputStream::Stdout && is_completion(text) {
        return Some(ProgressEvent::Completed);
    }

    if let Some(captures) = PERCENT.captures(text) {
        if let Ok(percent) = captures[1].parse::<f64>() {
            let percent = percent.clamp(0.0, 100.0);
            return Some(ProgressEvent::Progress {
                percent,
                message: format!("Downloading... {:.1}%", percent),
            });
        }
    }

    if let Some(captures) = DESTINATION
        .captures(text)
        .or_else(|| MERGER.captures(text))
    {
        return Some(ProgressEvent::FilenameDiscovered(PathBuf::from(
            captures[1].trim(),
        )));
    }

    if line.stream == OutputStream::Stderr && is_error(text) {
        return Some(ProgressEvent::ToolError(text.to_string()));
    }

    None
}

fn is_completion(text: &str) -> bool {
    let literal = text
        .strip_prefix(COMPLETE_MARKER)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));

    literal || text.contains(ALREADY_DOWNLOADED)
}

fn is_error(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("error") || lowered.contains("failed")
}

/// A line classifier with configurable tolerance for stderr noise.
///
/// Stderr lines starting with one of the benign prefixes never count as tool errors. With no
/// prefixes this behaves exactly like [`parse_line`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressParser {
    benign_stderr_prefixes: Vec<String>,
}

impl ProgressParser {
    /// Creates a parser that ignores stderr lines starting with any of `benign_stderr_prefixes`.
    pub fn new(benign_stderr_prefixes: Vec<String>) -> Self {
        Self {
            benign_stderr_prefixes,
        }
    }

    /// Classifies a single output line.
    pub fn parse(&self, line: &OutputLine) -> Option<ProgressEvent> {
        let event = parse_line(line)?;

        if let ProgressEvent::ToolError(text) = &event {
            if self.is_benign(text) {
                #[cfg(feature = "tracing")]
                tracing::debug!("Ignoring benign stderr line: {}", text);

                return None;
            }
        }

        Some(event)
    }

    fn is_benign(&self, text: &str) -> bool {
        self.benign_stderr_prefixes
            .iter()
            .any(|prefix| text.starts_with(prefix.as_str()))
    }
}
