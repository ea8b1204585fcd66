//! Validation of download requests and construction of the tool's arguments.

use crate::error::{Error, Result};
use crate::model::{JobRequest, MediaFormat};
use regex::Regex;
use std::sync::LazyLock;

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.)?(youtube\.com/(watch\?v=|embed/|v/)|youtu\.be/|m\.youtube\.com/watch\?v=)[A-Za-z0-9_-]{11}",
    )
    .unwrap()
});
static VIDEO_QUALITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,4})[pP]?$").unwrap());
static AUDIO_BITRATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{2,3}[kK]?$").unwrap());

/// The quality of a validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    /// The best available video.
    Best,
    /// Video capped to a maximum height in pixels.
    MaxHeight(u32),
    /// An audio quality token understood by the tool: a VBR level or a bitrate.
    Audio(String),
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// The URL of the media page.
    pub url: String,
    /// The output format.
    pub format: MediaFormat,
    /// The requested quality.
    pub quality: Quality,
}

/// Checks that a URL points at a single video of the supported platform.
pub fn is_supported_url(url: &str) -> bool {
    VIDEO_URL.is_match(url.trim())
}

/// Validates a raw request.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the URL is not a supported video URL, the format is unknown,
/// or the quality does not fit the format.
pub fn validate(request: &JobRequest) -> Result<ValidatedRequest> {
    let url = request.url.trim();
    if !is_supported_url(url) {
        return Err(Error::Validation("Invalid YouTube URL".to_string()));
    }

    let format: MediaFormat = request.format.parse()?;
    let quality = parse_quality(format, request.quality.trim())?;

    Ok(ValidatedRequest {
        url: url.to_string(),
        format,
        quality,
    })
}

fn parse_quality(format: MediaFormat, quality: &str) -> Result<Quality> {
    match format {
        MediaFormat::Video => {
            if quality.eq_ignore_ascii_case("best") {
                return Ok(Quality::Best);
            }
            VIDEO_QUALITY
                .captures(quality)
                .and_then(|captures| captures[1].parse::<u32>().ok())
                .filter(|height| *height > 0)
                .map(Quality::MaxHeight)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "Video quality must be \"best\" or a resolution such as 720p, got {:?}",
                        quality
                    ))
                })
        }
        MediaFormat::Audio => {
            let vbr_level = quality.parse::<u8>().is_ok_and(|level| level <= 10);
            if vbr_level || AUDIO_BITRATE.is_match(quality) {
                return Ok(Quality::Audio(quality.to_string()));
            }
            Err(Error::Validation(format!(
                "Audio quality must be a level from 0 to 10 or a bitrate such as 192K, got {:?}",
                quality
            )))
        }
    }
}

/// Builds the tool arguments for a validated request.
///
/// The result only depends on the inputs.
///
/// # Arguments
///
/// * `format` - The output format.
/// * `quality` - The requested quality.
/// * `output_template` - The output path, with `%(ext)s` where the extension goes.
/// * `url` - The URL of the media page.
pub fn build_args(
    format: MediaFormat,
    quality: &Quality,
    output_template: &str,
    url: &str,
) -> Vec<String> {
    let mut args = vec![
        "--newline",
        "--progress",
        "--no-playlist",
        "--no-mtime",
        "-o",
        output_template,
    ]
    .into_iter()
    .map(String::from)
    .collect::<Vec<_>>();

    match (format, quality) {
        (MediaFormat::Video, Quality::MaxHeight(height)) => {
            args.push("-f".to_string());
            args.push(format!(
                "bestvideo[height<={height}]+bestaudio/best[height<={height}]"
            ));
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
        (MediaFormat::Video, _) => {
            args.push("-f".to_string());
            args.push("bestvideo+bestaudio/best".to_string());
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
        (MediaFormat::Audio, quality) => {
            let level = match quality {
                Quality::Audio(level) => level.clone(),
                Quality::MaxHeight(height) => height.to_string(),
                Quality::Best => "0".to_string(),
            };
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
            args.push("--audio-quality".to_string());
            args.push(level);
        }
    }

    args.push(url.to_string());
    args
}
