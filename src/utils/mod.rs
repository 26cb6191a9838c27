use anyhow::Result;
use url::Url;

/// Parse the numeric status id out of a tweet URL
pub fn tweet_id_from_url(url: &str) -> Result<u64> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    let host_ok = parsed.host_str().is_some_and(|host| {
        let host = host.strip_prefix("www.").unwrap_or(host);
        let host = host.strip_prefix("mobile.").unwrap_or(host);
        matches!(host, "twitter.com" | "x.com")
    });

    if !host_ok {
        anyhow::bail!("Not a twitter.com or x.com URL: {}", url);
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();

    segments
        .iter()
        .position(|s| *s == "status" || *s == "statuses")
        .and_then(|i| segments.get(i + 1))
        .map(|raw| raw.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .filter(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("No status id found in URL: {}", url))
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("yt-dlp").await {
        missing.push("yt-dlp - required for downloading tweet videos".to_string());
    }

    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for clip editing".to_string());
    }

    if !check_command_available("ffprobe").await {
        missing.push("ffprobe - required for media inspection (ships with ffmpeg)".to_string());
    }

    if !check_command_available("edge-tts").await {
        missing.push("edge-tts - recommended for narration (clips keep their original audio without it)".to_string());
    }

    missing
}

/// Check if a command is available in PATH
pub async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
