use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use std::path::PathBuf;
use uuid::Uuid;

use crate::downloader::SourceVideo;
use crate::tts::NarrationSynthesizer;
use crate::{StageError, StageResult};

pub mod ffmpeg;

const MAX_OVERLAY_WORD: usize = 16;
const MAX_OVERLAY_LINE: usize = 18;
const MAX_OVERLAY_LINES: usize = 7;

/// Sub-interval of the source video selected for publishing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    /// Seconds from the start of the source
    pub start_offset: f64,

    /// Clip length in seconds
    pub duration: f64,
}

impl ClipWindow {
    pub fn end(&self) -> f64 {
        self.start_offset + self.duration
    }

    pub fn fits_within(&self, source_duration: f64) -> bool {
        self.start_offset >= 0.0 && self.duration > 0.0 && self.end() <= source_duration + 1e-6
    }
}

/// Picks a random clip window within the configured length bounds
#[derive(Debug, Clone, Copy)]
pub struct ClipSelector {
    min_secs: f64,
    max_secs: f64,
}

impl ClipSelector {
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    pub fn select(&self, video_duration: f64) -> StageResult<ClipWindow> {
        self.select_with_rng(video_duration, &mut rand::thread_rng())
    }

    /// Uniformly pick a clip length, then a start that keeps the window
    /// inside the source
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        video_duration: f64,
        rng: &mut R,
    ) -> StageResult<ClipWindow> {
        if !video_duration.is_finite() || video_duration < self.min_secs {
            return Err(StageError::content(format!(
                "video is {video_duration:.1}s, below the {:.0}s minimum",
                self.min_secs
            )));
        }

        let longest = self.max_secs.min(video_duration);
        let duration = if longest > self.min_secs {
            rng.gen_range(self.min_secs..=longest)
        } else {
            self.min_secs
        };

        let latest_start = video_duration - duration;
        let start_offset = if latest_start > 0.0 {
            rng.gen_range(0.0..=latest_start)
        } else {
            0.0
        };

        Ok(ClipWindow { start_offset, duration })
    }
}

/// Everything the renderer needs to produce and publish one clip
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source_path: PathBuf,
    pub source_duration: f64,
    pub window: ClipWindow,
    pub overlay_text: String,
    pub narration_text: Option<String>,
    pub caption: String,
}

impl RenderRequest {
    /// Assemble and validate a request; no media work happens here
    pub fn build(
        source: &SourceVideo,
        window: ClipWindow,
        overlay_text: &str,
        narration_text: Option<&str>,
        caption: &str,
    ) -> StageResult<Self> {
        if caption.trim().is_empty() {
            return Err(StageError::content("caption must not be empty"));
        }

        if !window.fits_within(source.duration) {
            return Err(StageError::content(format!(
                "clip window {:.1}s+{:.1}s does not fit a {:.1}s source",
                window.start_offset, window.duration, source.duration
            )));
        }

        let narration_text = narration_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        if narration_text.is_none() {
            tracing::warn!("no narration text; clip will carry original audio only");
        }

        Ok(Self {
            source_path: source.path.clone(),
            source_duration: source.duration,
            window,
            overlay_text: overlay_text.trim().to_string(),
            narration_text,
            caption: caption.to_string(),
        })
    }
}

/// Produces the final vertical clip for a render request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render the clip and return the finished file path
    async fn render(&self, request: &RenderRequest) -> StageResult<PathBuf>;
}

/// FFmpeg-backed renderer: cut, reframe to vertical, narrate, overlay
pub struct FfmpegRenderer {
    output_dir: PathBuf,
    synthesizer: Box<dyn NarrationSynthesizer>,
    target_width: u32,
    target_height: u32,
}

impl FfmpegRenderer {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        synthesizer: Box<dyn NarrationSynthesizer>,
        target_width: u32,
        target_height: u32,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            synthesizer,
            target_width,
            target_height,
        }
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(&self, request: &RenderRequest) -> StageResult<PathBuf> {
        let work = tempfile::tempdir()
            .map_err(|e| StageError::transient(format!("cannot create work directory: {e}")))?;

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );

        progress.set_message("Cutting clip...");
        let cut = work.path().join("cut.mp4");
        ffmpeg::extract_clip(&request.source_path, request.window, &cut).await?;

        progress.set_message("Reframing to vertical...");
        let vertical = work.path().join("vertical.mp4");
        ffmpeg::convert_to_vertical(&cut, &vertical, self.target_width, self.target_height).await?;

        let narrated = match &request.narration_text {
            Some(text) => {
                progress.set_message("Synthesizing narration...");
                let narration = work.path().join("narration.mp3");
                self.synthesizer.synthesize(text, &narration).await?;

                progress.set_message("Mixing narration...");
                let mixed = work.path().join("narrated.mp4");
                ffmpeg::mix_narration(&vertical, &narration, &mixed).await?;
                mixed
            }
            None => {
                tracing::warn!("rendering without narration");
                vertical
            }
        };

        let output = self
            .output_dir
            .join(format!("clip_{}.mp4", &Uuid::new_v4().to_string()[..8]));

        let lines = layout_overlay_lines(&request.overlay_text);
        if lines.is_empty() {
            fs_err::copy(&narrated, &output)
                .map_err(|e| StageError::transient(format!("cannot place rendered clip: {e}")))?;
        } else {
            progress.set_message("Burning text overlay...");
            ffmpeg::draw_overlay(&narrated, &lines, &output, self.target_height).await?;
        }

        progress.finish_with_message("Render complete");
        tracing::info!("rendered {}", output.display());

        Ok(output)
    }
}

/// Break overlay text into short uppercase rows for the drawtext block.
/// Over-long words are clipped and at most seven rows survive.
pub fn layout_overlay_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word: String = word.chars().take(MAX_OVERLAY_WORD).collect();
        let word_len = word.chars().count();

        if current.is_empty() {
            current = word;
        } else if current.chars().count() + 1 + word_len <= MAX_OVERLAY_LINE {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(current.to_uppercase());
            current = word;
        }
    }

    if !current.is_empty() {
        lines.push(current.to_uppercase());
    }

    lines.truncate(MAX_OVERLAY_LINES);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::Path;

    fn source(duration: f64) -> SourceVideo {
        SourceVideo {
            path: Path::new("downloads/tweet_ab12cd34.mp4").to_path_buf(),
            duration,
            width: Some(1280),
            height: Some(720),
        }
    }

    #[test]
    fn selected_windows_stay_inside_the_source() {
        let selector = ClipSelector::new(15.0, 60.0);

        for duration in [15.0, 20.0, 59.9, 60.0, 61.0, 600.0, 3600.0] {
            for seed in 0..32 {
                let mut rng = StdRng::seed_from_u64(seed);
                let window = selector.select_with_rng(duration, &mut rng).unwrap();

                assert!(window.start_offset >= 0.0, "{duration}s seed {seed}: {window:?}");
                assert!(window.duration >= 15.0, "{duration}s seed {seed}: {window:?}");
                assert!(window.duration <= 60.0, "{duration}s seed {seed}: {window:?}");
                assert!(window.fits_within(duration), "{duration}s seed {seed}: {window:?}");
            }
        }
    }

    #[test]
    fn minimum_length_video_becomes_a_full_clip() {
        let selector = ClipSelector::new(15.0, 60.0);
        let mut rng = StdRng::seed_from_u64(0);
        let window = selector.select_with_rng(15.0, &mut rng).unwrap();

        assert_eq!(window.start_offset, 0.0);
        assert_eq!(window.duration, 15.0);
    }

    #[test]
    fn too_short_video_is_a_content_error() {
        let selector = ClipSelector::new(15.0, 60.0);
        let mut rng = StdRng::seed_from_u64(0);
        let err = selector.select_with_rng(9.5, &mut rng).unwrap_err();

        assert!(matches!(err, StageError::Content(_)));
    }

    #[test]
    fn build_rejects_empty_caption() {
        let window = ClipWindow { start_offset: 0.0, duration: 15.0 };
        let err = RenderRequest::build(&source(30.0), window, "INCENDIO", Some("texto"), "  ").unwrap_err();

        assert!(matches!(err, StageError::Content(_)));
    }

    #[test]
    fn build_rejects_window_outside_source() {
        let window = ClipWindow { start_offset: 20.0, duration: 15.0 };
        let err = RenderRequest::build(&source(30.0), window, "INCENDIO", Some("texto"), "caption").unwrap_err();

        assert!(matches!(err, StageError::Content(_)));
    }

    #[test]
    fn build_tolerates_missing_narration() {
        let window = ClipWindow { start_offset: 0.0, duration: 15.0 };
        let request = RenderRequest::build(&source(30.0), window, "INCENDIO", Some("   "), "caption").unwrap();

        assert_eq!(request.narration_text, None);
        assert_eq!(request.caption, "caption");
    }

    #[test]
    fn overlay_lines_are_short_uppercase_and_capped() {
        let text = "incendio de gran magnitud en un edificio de viviendas junto a la estación con humo visible desde varios kilómetros de distancia";
        let lines = layout_overlay_lines(text);

        assert!(lines.len() <= 7);
        for line in &lines {
            assert!(line.chars().count() <= 18, "{line:?}");
            assert_eq!(*line, line.to_uppercase());
        }
    }

    #[test]
    fn overlay_clips_oversized_words() {
        let lines = layout_overlay_lines("supercalifragilisticoespialidoso");
        assert_eq!(lines, vec!["SUPERCALIFRAGILI"]);
    }

    #[test]
    fn empty_overlay_text_yields_no_lines() {
        assert!(layout_overlay_lines("   ").is_empty());
    }
}
