use crate::{
    error::ResolutionError,
    resolver::Extractor,
    track::{ResolvedSource, StreamHandle},
};
use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::{path::Path, process::Stdio, time::Duration};
use tokio::process::Command;
use youtube_dl::{download_yt_dlp, SingleVideo, YoutubeDlOutput};

lazy_static! {
    static ref RESTRICTED_RE: Regex = Regex::new(
        r"(?i)(sign in to confirm your age|age.restricted|not available in your country|geo.?restrict|private video|members.only|requires payment)"
    )
    .expect("valid regex");
    static ref UNSUPPORTED_RE: Regex =
        Regex::new(r"(?i)(unsupported url|no video formats found|is not a valid url|requested format is not available)")
            .expect("valid regex");
    static ref NOT_FOUND_RE: Regex =
        Regex::new(r"(?i)(video unavailable|http error 404|does not exist|has been removed|not found)")
            .expect("valid regex");
    static ref NETWORK_RE: Regex = Regex::new(
        r"(?i)(unable to download|timed out|connection (reset|refused|aborted)|temporary failure|name resolution|network is unreachable|http error 5\d\d)"
    )
    .expect("valid regex");
}

/// Downloads the yt-dlp binary into the directory of `path` if it's missing.
pub async fn ensure_binary(path: &str) -> Result<()> {
    let binary = Path::new(path).to_path_buf();
    let binary_exists = {
        let binary = binary.clone();
        tokio::task::spawn_blocking(move || binary.exists()).await?
    };

    if !binary_exists {
        let dir = binary
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        info!("Downloading yt-dlp binary into {}", dir.display());
        download_yt_dlp(dir).await?;
    }

    Ok(())
}

/// Resolves URLs and search terms with yt-dlp. The yt-dlp process is killed
/// when the extraction is dropped, so a timed out resolution leaves nothing
/// running.
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        YtDlpExtractor {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, reference: &str) -> Result<ResolvedSource, ResolutionError> {
        let output = Command::new(&self.binary)
            .args([
                "--no-warnings",
                "--dump-single-json",
                "--format",
                "bestaudio/best",
                "--default-search",
                "ytsearch",
                "--no-playlist",
                "--",
            ])
            .arg(reference)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolutionError::Unsupported {
                reason: format!("could not run yt-dlp: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(reference, &stderr));
        }

        let output = parse_output(&output.stdout).map_err(|e| ResolutionError::Network {
            reason: format!("unreadable yt-dlp output: {e}"),
        })?;

        let video = first_video(output).ok_or_else(|| ResolutionError::NotFound {
            reference: reference.to_string(),
        })?;

        let url = video.url.ok_or_else(|| ResolutionError::Unsupported {
            reason: format!("yt-dlp returned no stream URL for {reference}"),
        })?;
        let title = video.title.unwrap_or_else(|| reference.to_string());
        let duration = video.duration.as_ref().and_then(duration_from_json);

        Ok(ResolvedSource {
            handle: StreamHandle::Url(url),
            title,
            duration,
        })
    }
}

/// Search results come back as a playlist, everything else as one video.
pub fn parse_output(stdout: &[u8]) -> Result<YoutubeDlOutput, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(stdout)?;
    if value["_type"] == "playlist" {
        Ok(YoutubeDlOutput::Playlist(Box::new(serde_json::from_value(
            value,
        )?)))
    } else {
        Ok(YoutubeDlOutput::SingleVideo(Box::new(
            serde_json::from_value(value)?,
        )))
    }
}

fn first_video(output: YoutubeDlOutput) -> Option<SingleVideo> {
    let single_video = output.clone().into_single_video();
    single_video.or_else(|| {
        let playlist = output.into_playlist()?;
        let entries = playlist.entries?;
        entries.into_iter().next()
    })
}

/// yt-dlp reports durations as integer or fractional seconds.
pub fn duration_from_json(value: &serde_json::Value) -> Option<Duration> {
    value
        .as_u64()
        .map(Duration::from_secs)
        .or_else(|| value.as_f64().filter(|secs| *secs >= 0.0).map(Duration::from_secs_f64))
}

/// Maps yt-dlp's error output to a failure kind.
pub fn classify_stderr(reference: &str, stderr: &str) -> ResolutionError {
    let reason = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string();

    if RESTRICTED_RE.is_match(stderr) {
        ResolutionError::Restricted { reason }
    } else if UNSUPPORTED_RE.is_match(stderr) {
        ResolutionError::Unsupported { reason }
    } else if NOT_FOUND_RE.is_match(stderr) {
        ResolutionError::NotFound {
            reference: reference.to_string(),
        }
    } else if NETWORK_RE.is_match(stderr) {
        ResolutionError::Network { reason }
    } else {
        ResolutionError::Unsupported { reason }
    }
}
