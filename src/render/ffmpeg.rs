use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::ClipWindow;
use crate::{StageError, StageResult};

const FONT_SIZE: u32 = 46;
const LINE_SPACING: u32 = 55;

/// Check that both ffmpeg and ffprobe respond
pub async fn check_availability() -> bool {
    tool_responds("ffmpeg").await && tool_responds("ffprobe").await
}

async fn tool_responds(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Media duration in seconds
pub async fn probe_duration(path: &Path) -> StageResult<f64> {
    let mut command = Command::new("ffprobe");
    command.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        &path.to_string_lossy(),
    ]);

    let stdout = capture(command, "ffprobe duration").await?;
    stdout
        .parse()
        .map_err(|_| StageError::content(format!("ffprobe returned no duration for {}", path.display())))
}

/// Video frame dimensions as (width, height)
pub async fn probe_dimensions(path: &Path) -> StageResult<(u32, u32)> {
    let mut command = Command::new("ffprobe");
    command.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "csv=s=x:p=0",
        &path.to_string_lossy(),
    ]);

    let stdout = capture(command, "ffprobe dimensions").await?;
    let mut parts = stdout.split('x');
    let width = parts.next().and_then(|w| w.trim().parse().ok());
    let height = parts.next().and_then(|h| h.trim().parse().ok());

    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(StageError::content(format!(
            "no usable video stream dimensions in {}",
            path.display()
        ))),
    }
}

/// Cut the selected window out of the source, re-encoded for streaming
pub async fn extract_clip(input: &Path, window: ClipWindow, output: &Path) -> StageResult<()> {
    let start = format!("{:.3}", window.start_offset);
    let duration = format!("{:.3}", window.duration);

    let mut command = Command::new("ffmpeg");
    command.args([
        "-y",
        "-ss",
        &start,
        "-i",
        &input.to_string_lossy(),
        "-t",
        &duration,
        "-c:v",
        "libx264",
        "-preset",
        "fast",
        "-crf",
        "23",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-movflags",
        "+faststart",
        &output.to_string_lossy(),
    ]);

    run(command, "ffmpeg clip extraction").await
}

/// Reframe to the vertical target: scale to cover, then center-crop.
/// Cropping instead of padding means no black bars on either axis.
pub async fn convert_to_vertical(
    input: &Path,
    output: &Path,
    target_width: u32,
    target_height: u32,
) -> StageResult<()> {
    let (width, height) = probe_dimensions(input).await?;

    let source_ratio = width as f64 / height as f64;
    let target_ratio = target_width as f64 / target_height as f64;

    let scale = if source_ratio > target_ratio {
        format!("scale=-1:{target_height}")
    } else {
        format!("scale={target_width}:-1")
    };
    let filter = format!("{scale},crop={target_width}:{target_height}");

    let mut command = Command::new("ffmpeg");
    command.args([
        "-y",
        "-i",
        &input.to_string_lossy(),
        "-vf",
        &filter,
        "-c:v",
        "libx264",
        "-preset",
        "fast",
        "-crf",
        "23",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        &output.to_string_lossy(),
    ]);

    run(command, "ffmpeg vertical conversion").await
}

/// Mix synthesized narration over the clip, ducking the original audio
pub async fn mix_narration(video: &Path, narration: &Path, output: &Path) -> StageResult<()> {
    let mut command = Command::new("ffmpeg");
    command.args([
        "-y",
        "-i",
        &video.to_string_lossy(),
        "-i",
        &narration.to_string_lossy(),
        "-filter_complex",
        "[0:a]volume=0.2[a0];[1:a]volume=1.0[a1];[a0][a1]amix=inputs=2:duration=first[aout]",
        "-map",
        "0:v",
        "-map",
        "[aout]",
        "-c:v",
        "copy",
        "-c:a",
        "aac",
        "-b:a",
        "192k",
        "-shortest",
        &output.to_string_lossy(),
    ]);

    run(command, "ffmpeg narration mix").await
}

/// Burn centered text lines onto the clip
pub async fn draw_overlay(
    input: &Path,
    lines: &[String],
    output: &Path,
    frame_height: u32,
) -> StageResult<()> {
    if lines.is_empty() {
        return Err(StageError::content("overlay requested with no text lines"));
    }

    let filter = overlay_filter(lines, frame_height);

    let mut command = Command::new("ffmpeg");
    command.args([
        "-y",
        "-i",
        &input.to_string_lossy(),
        "-vf",
        &filter,
        "-c:v",
        "libx264",
        "-preset",
        "fast",
        "-crf",
        "23",
        "-c:a",
        "copy",
        &output.to_string_lossy(),
    ]);

    run(command, "ffmpeg text overlay").await
}

/// One drawtext clause per line, vertically centered as a block
fn overlay_filter(lines: &[String], frame_height: u32) -> String {
    let block_height = lines.len() as u32 * LINE_SPACING;
    let y_start = frame_height.saturating_sub(block_height) / 2;

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let y = y_start + i as u32 * LINE_SPACING;
            format!(
                "drawtext=text='{}':fontsize={FONT_SIZE}:fontcolor=white:borderw=5:bordercolor=black:x=(w-text_w)/2:y={y}",
                escape_drawtext(line)
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Drop characters that would break out of the drawtext argument
fn escape_drawtext(line: &str) -> String {
    line.chars()
        .filter(|c| !matches!(c, '\'' | '"' | ';' | ':' | '\\' | '%'))
        .collect()
}

async fn run(command: Command, what: &str) -> StageResult<()> {
    capture(command, what).await.map(|_| ())
}

async fn capture(mut command: Command, what: &str) -> StageResult<String> {
    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| StageError::transient(format!("failed to spawn {what}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StageError::content(format!("{what} failed: {}", tail(stderr.trim(), 400))));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// ffmpeg puts the reason on its last lines, so keep the tail
fn tail(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    chars[chars.len() - max_chars..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_filter_centers_the_block() {
        let lines = vec!["INCENDIO EN".to_string(), "VALLECAS".to_string()];
        let filter = overlay_filter(&lines, 1920);

        // Two lines of 55px center around y = 905
        assert!(filter.contains(":y=905"), "{filter}");
        assert!(filter.contains(":y=960"), "{filter}");
        assert_eq!(filter.matches("drawtext=").count(), 2);
    }

    #[test]
    fn drawtext_arguments_lose_breaking_characters() {
        assert_eq!(escape_drawtext("INCENDIO: \"GRAVE\"; 100%"), "INCENDIO GRAVE 100");
    }

    #[test]
    fn tail_keeps_the_end_of_long_output() {
        let text = "a".repeat(500) + "the actual error";
        let kept = tail(&text, 40);
        assert_eq!(kept.chars().count(), 40);
        assert!(kept.ends_with("the actual error"));
    }
}
