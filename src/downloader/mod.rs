use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use uuid::Uuid;

use crate::render::ffmpeg;
use crate::{StageError, StageResult};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov", "m4v"];

/// A downloaded source video and its probed metadata
#[derive(Debug, Clone)]
pub struct SourceVideo {
    pub path: PathBuf,

    /// Full length in seconds
    pub duration: f64,

    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Metadata yt-dlp reports without downloading
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Fetches tweet video to local disk
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download the video behind `media_url` and probe its metadata
    async fn download(&self, media_url: &str) -> StageResult<SourceVideo>;
}

/// Video downloader backed by yt-dlp
///
/// Handles both direct mp4 variant URLs and tweet permalinks; yt-dlp picks
/// the best mp4 rendition either way.
pub struct YtDlpDownloader {
    yt_dlp_path: String,
    download_dir: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            download_dir: download_dir.into(),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Probe metadata without downloading
    pub async fn video_info(&self, url: &str) -> StageResult<VideoInfo> {
        tracing::debug!("probing video info for {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-download", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::transient(format!("failed to spawn yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr, url));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| StageError::content(format!("yt-dlp metadata is not valid JSON: {e}")))?;

        Ok(VideoInfo {
            duration: info["duration"].as_f64(),
            title: info["title"].as_str().map(str::to_string),
            description: info["description"].as_str().map(str::to_string),
            width: info["width"].as_u64().map(|w| w as u32),
            height: info["height"].as_u64().map(|h| h as u32),
        })
    }

    /// Locate the file yt-dlp wrote for the given output stem
    fn find_downloaded(&self, stem: &str) -> StageResult<PathBuf> {
        let entries = fs_err::read_dir(&self.download_dir)
            .map_err(|e| StageError::transient(format!("cannot read download directory: {e}")))?;

        for entry in entries.flatten() {
            let path = entry.path();
            let stem_matches = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with(stem));

            if stem_matches && is_video_file(&path) {
                return Ok(path);
            }
        }

        Err(StageError::content(format!(
            "yt-dlp reported success but produced no video file for {stem}"
        )))
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, media_url: &str) -> StageResult<SourceVideo> {
        let info = self.video_info(media_url).await?;

        let stem = format!("tweet_{}", &Uuid::new_v4().to_string()[..8]);
        let template = self.download_dir.join(format!("{stem}.%(ext)s"));

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        progress.set_message("Downloading video with yt-dlp...");

        tracing::info!("downloading video from {}", media_url);

        let command = Command::new(&self.yt_dlp_path)
            .args([
                "--format",
                "best[ext=mp4]/best",
                "--output",
                &template.to_string_lossy(),
                "--no-playlist",
                "--socket-timeout",
                "30",
                "--retries",
                "3",
                media_url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(DOWNLOAD_TIMEOUT, command).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                progress.finish_and_clear();
                return Err(StageError::transient(format!("failed to spawn yt-dlp: {e}")));
            }
            Err(_) => {
                progress.finish_and_clear();
                return Err(StageError::transient(format!(
                    "yt-dlp timed out after {}s",
                    DOWNLOAD_TIMEOUT.as_secs()
                )));
            }
        };

        if !output.status.success() {
            progress.finish_and_clear();
            return Err(classify_failure(&output.stderr, media_url));
        }

        progress.finish_with_message("Download complete");

        let path = self.find_downloaded(&stem)?;
        let duration = match info.duration {
            Some(d) if d > 0.0 => d,
            _ => ffmpeg::probe_duration(&path).await?,
        };

        tracing::info!("downloaded {} ({:.1}s)", path.display(), duration);

        Ok(SourceVideo {
            path,
            duration,
            width: info.width,
            height: info.height,
        })
    }
}

/// Delete leftover downloads older than `max_age`; returns how many were removed
pub fn cleanup_old_downloads(dir: &Path, max_age: Duration) -> crate::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = match SystemTime::now().checked_sub(max_age) {
        Some(cutoff) => cutoff,
        None => return Ok(0),
    };

    let mut removed = 0;
    for entry in fs_err::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };

        if modified < cutoff {
            match fs_err::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("could not remove stale download {}: {e}", path.display()),
            }
        }
    }

    if removed > 0 {
        tracing::info!("removed {removed} stale downloads from {}", dir.display());
    }

    Ok(removed)
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Sort yt-dlp failures into tweet-specific trouble vs environment trouble
fn classify_failure(stderr: &[u8], url: &str) -> StageError {
    const CONTENT_MARKERS: &[&str] = &[
        "unsupported url",
        "no video could be found",
        "http error 404",
        "not found",
        "unavailable",
        "suspended",
        "private",
    ];

    let stderr = String::from_utf8_lossy(stderr);
    let lower = stderr.to_lowercase();
    let excerpt: String = stderr.trim().chars().take(400).collect();

    if CONTENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        StageError::content(format!("yt-dlp cannot download {url}: {excerpt}"))
    } else {
        StageError::transient(format!("yt-dlp failed for {url}: {excerpt}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_video_is_content_failure() {
        let err = classify_failure(b"ERROR: No video could be found in this tweet", "https://t.co/x");
        assert!(matches!(err, StageError::Content(_)));
    }

    #[test]
    fn network_trouble_is_transient() {
        let err = classify_failure(b"ERROR: Connection reset by peer", "https://t.co/x");
        assert!(err.is_transient());
    }

    #[test]
    fn recognizes_video_extensions() {
        assert!(is_video_file(Path::new("downloads/tweet_ab12cd34.mp4")));
        assert!(is_video_file(Path::new("downloads/clip.WEBM")));
        assert!(!is_video_file(Path::new("downloads/tweet_ab12cd34.info.json")));
        assert!(!is_video_file(Path::new("downloads/notes.txt")));
    }

    #[test]
    fn cleanup_skips_missing_dir() {
        assert_eq!(
            cleanup_old_downloads(Path::new("does/not/exist"), Duration::from_secs(60)).unwrap(),
            0
        );
    }

    #[test]
    fn cleanup_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("fresh.mp4"), b"video").unwrap();

        let removed = cleanup_old_downloads(dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.mp4").exists());
    }

    #[test]
    fn cleanup_removes_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("stale.mp4"), b"video").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let removed = cleanup_old_downloads(dir.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("stale.mp4").exists());
    }
}
