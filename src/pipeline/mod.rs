use anyhow::Context;
use tokio::sync::watch;

use crate::config::Config;
use crate::downloader::{Downloader, YtDlpDownloader};
use crate::monitor::{PollScheduler, SeenSet, TweetMonitor};
use crate::render::{ClipSelector, FfmpegRenderer, RenderRequest, Renderer};
use crate::rewriter::CaptionRewriter;
use crate::tts::EdgeTtsSynthesizer;
use crate::twitter::{Tweet, TwitterApiClient};
use crate::uploader::{TikTokUploader, Uploader};
use crate::utils::format_duration;
use crate::{Result, StageError, StageResult};

/// Where a tweet sits in its pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TweetState {
    Discovered,
    Downloaded,
    Rendered,
    Published,
    Done,
    Failed,
}

/// Drives one tweet at a time through download, render and publish
pub struct Orchestrator {
    downloader: Box<dyn Downloader>,
    renderer: Box<dyn Renderer>,
    uploader: Box<dyn Uploader>,
    selector: ClipSelector,
    rewriter: CaptionRewriter,
    seen: SeenSet,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(
        downloader: Box<dyn Downloader>,
        renderer: Box<dyn Renderer>,
        uploader: Box<dyn Uploader>,
        selector: ClipSelector,
        rewriter: CaptionRewriter,
        seen: SeenSet,
    ) -> Self {
        Self {
            downloader,
            renderer,
            uploader,
            selector,
            rewriter,
            seen,
            dry_run: false,
        }
    }

    /// Build the production wiring from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let synthesizer = EdgeTtsSynthesizer::new(&config.bot.voice);
        let renderer = FfmpegRenderer::new(
            config.bot.processed_dir.clone(),
            Box::new(synthesizer),
            config.video.target_width,
            config.video.target_height,
        );

        Ok(Self::new(
            Box::new(YtDlpDownloader::new(config.bot.downloads_dir.clone())),
            Box::new(renderer),
            Box::new(TikTokUploader::new(config.tiktok.cookies_file.clone())?),
            ClipSelector::new(config.video.min_clip_secs, config.video.max_clip_secs),
            CaptionRewriter::new(config.bot.default_hashtags.clone()),
            SeenSet::load(config.bot.data_dir.join("seen_tweets.json"))?,
        ))
    }

    /// Process everything except the publish step
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Run one tweet to a terminal state and commit it as seen
    ///
    /// Both terminal states commit: a tweet gets one attempt, whatever
    /// happens to it.
    pub async fn process_tweet(&mut self, tweet: &Tweet) -> TweetState {
        tracing::info!("processing tweet {} ({})", tweet.id, tweet.created_at);

        let state = match self.run_stages(tweet).await {
            Ok(state) => state,
            Err(e) => {
                log_stage_error(tweet.id, &e);
                TweetState::Failed
            }
        };

        if let Err(e) = self.seen.insert(tweet.id) {
            tracing::error!("could not commit tweet {} as seen: {e:#}", tweet.id);
        }

        let state = if state == TweetState::Published {
            TweetState::Done
        } else {
            state
        };

        tracing::info!("tweet {} finished as {:?}", tweet.id, state);
        state
    }

    async fn run_stages(&self, tweet: &Tweet) -> StageResult<TweetState> {
        let media_url = tweet
            .media_url
            .as_deref()
            .ok_or_else(|| StageError::content("tweet carries no downloadable video"))?;

        let source = self.downloader.download(media_url).await?;
        tracing::debug!("tweet {} downloaded to {}", tweet.id, source.path.display());

        let window = self.selector.select(source.duration)?;
        tracing::debug!(
            "clip window {:.1}s at offset {:.1}s of {:.1}s",
            window.duration,
            window.start_offset,
            source.duration
        );

        let overlay = self.rewriter.clean(&tweet.text);
        let caption = self.rewriter.compose_caption(&tweet.text);
        let narration = (!overlay.is_empty()).then_some(overlay.as_str());

        let request = RenderRequest::build(&source, window, &overlay, narration, &caption)?;
        let clip = self.renderer.render(&request).await?;
        tracing::debug!("tweet {} rendered to {}", tweet.id, clip.display());

        if self.dry_run {
            tracing::info!("dry run: skipping publish of {}", clip.display());
            return Ok(TweetState::Published);
        }

        match self.uploader.publish(&clip, &request.caption).await {
            Ok(post_id) => {
                tracing::info!("published tweet {} as TikTok post {}", tweet.id, post_id);
                Ok(TweetState::Published)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("publish failed for tweet {}: {e}; retrying once", tweet.id);
                let post_id = self.uploader.publish(&clip, &request.caption).await?;
                tracing::info!("published tweet {} as TikTok post {} on retry", tweet.id, post_id);
                Ok(TweetState::Published)
            }
            Err(e) => Err(e),
        }
    }
}

fn log_stage_error(tweet_id: u64, error: &StageError) {
    match error {
        StageError::Transient(msg) => tracing::warn!("tweet {tweet_id} failed (transient): {msg}"),
        StageError::Content(msg) => tracing::info!("tweet {tweet_id} skipped: {msg}"),
        StageError::Fatal(msg) => tracing::error!("tweet {tweet_id} failed (needs attention): {msg}"),
    }
}

/// The long-running monitor loop around the orchestrator
pub struct Bot {
    orchestrator: Orchestrator,
    monitor: TweetMonitor,
    scheduler: PollScheduler,
}

impl Bot {
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let bearer = config
            .twitter
            .bearer_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .context("TWITTER_BEARER_TOKEN is required to monitor the account")?;

        let source = TwitterApiClient::new(&config.twitter.username, bearer)?;

        Ok(Self {
            orchestrator: Orchestrator::from_config(config)?.with_dry_run(dry_run),
            monitor: TweetMonitor::new(Box::new(source)),
            scheduler: PollScheduler::new(
                config.bot.check_interval_min,
                config.bot.check_interval_max,
            ),
        })
    }

    /// One poll cycle; returns how many tweets finished as Done
    pub async fn run_once(&mut self) -> Result<usize> {
        let tweets = match self.monitor.poll(self.orchestrator.seen()).await {
            Ok(tweets) => tweets,
            Err(e) => {
                // The loop survives bad polls; fatal trouble is surfaced
                // loudly for the operator while polling continues
                match &e {
                    StageError::Fatal(msg) => tracing::error!("poll failed: {msg}"),
                    _ => tracing::warn!("poll failed: {e}"),
                }
                return Ok(0);
            }
        };

        let mut published = 0;
        for tweet in &tweets {
            if self.orchestrator.process_tweet(tweet).await == TweetState::Done {
                published += 1;
            }
        }

        Ok(published)
    }

    /// Poll until asked to stop; a cycle in progress always completes
    pub async fn run_forever(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("bot started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                tracing::error!("poll cycle failed: {e:#}");
            }

            let delay = self.scheduler.jittered_delay(&mut rand::thread_rng());
            tracing::info!("next check in {}", format_duration(delay.as_secs_f64()));

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("bot stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{MockDownloader, SourceVideo};
    use crate::render::MockRenderer;
    use crate::uploader::MockUploader;
    use chrono::Utc;
    use std::path::PathBuf;

    fn tweet(id: u64) -> Tweet {
        Tweet {
            id,
            text: "Incendio en una vivienda de Vallecas".to_string(),
            media_url: Some(format!("https://video.example/{id}.mp4")),
            created_at: Utc::now(),
        }
    }

    fn source_video(duration: f64) -> SourceVideo {
        SourceVideo {
            path: PathBuf::from("downloads/tweet_ab12cd34.mp4"),
            duration,
            width: Some(1280),
            height: Some(720),
        }
    }

    fn orchestrator_with(
        downloader: MockDownloader,
        renderer: MockRenderer,
        uploader: MockUploader,
        dir: &tempfile::TempDir,
    ) -> Orchestrator {
        Orchestrator::new(
            Box::new(downloader),
            Box::new(renderer),
            Box::new(uploader),
            ClipSelector::new(15.0, 60.0),
            CaptionRewriter::new(vec!["#sucesoshoy".to_string()]),
            SeenSet::load(dir.path().join("seen.json")).unwrap(),
        )
    }

    #[tokio::test]
    async fn successful_run_publishes_and_commits() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(1)
            .returning(|_| Ok(source_video(30.0)));

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(1)
            .returning(|_| Ok(PathBuf::from("processed/clip_ab12cd34.mp4")));

        let mut uploader = MockUploader::new();
        uploader
            .expect_publish()
            .withf(|_, caption| caption.contains("#sucesoshoy"))
            .times(1)
            .returning(|_, _| Ok("7314159".to_string()));

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);
        let state = orchestrator.process_tweet(&tweet(100)).await;

        assert_eq!(state, TweetState::Done);
        assert!(orchestrator.seen().contains(100));
    }

    #[tokio::test]
    async fn download_failure_commits_and_skips_later_stages() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(1)
            .returning(|_| Err(StageError::content("tweet unavailable")));

        let mut renderer = MockRenderer::new();
        renderer.expect_render().never();

        let mut uploader = MockUploader::new();
        uploader.expect_publish().never();

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);
        let state = orchestrator.process_tweet(&tweet(101)).await;

        assert_eq!(state, TweetState::Failed);
        assert!(orchestrator.seen().contains(101));
    }

    #[tokio::test]
    async fn short_video_never_reaches_the_renderer() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(1)
            .returning(|_| Ok(source_video(5.0)));

        let mut renderer = MockRenderer::new();
        renderer.expect_render().never();

        let mut uploader = MockUploader::new();
        uploader.expect_publish().never();

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);
        let state = orchestrator.process_tweet(&tweet(102)).await;

        assert_eq!(state, TweetState::Failed);
        assert!(orchestrator.seen().contains(102));
    }

    #[tokio::test]
    async fn transient_publish_failure_retries_exactly_once() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|_| Ok(source_video(45.0)));

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(1)
            .returning(|_| Ok(PathBuf::from("processed/clip_1.mp4")));

        let mut uploader = MockUploader::new();
        let mut seq = mockall::Sequence::new();
        uploader
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(StageError::transient("HTTP 502")));
        uploader
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("7314160".to_string()));

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);
        let state = orchestrator.process_tweet(&tweet(103)).await;

        assert_eq!(state, TweetState::Done);
        assert!(orchestrator.seen().contains(103));
    }

    #[tokio::test]
    async fn repeated_transient_publish_failure_gives_up() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|_| Ok(source_video(45.0)));

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(1)
            .returning(|_| Ok(PathBuf::from("processed/clip_2.mp4")));

        let mut uploader = MockUploader::new();
        uploader
            .expect_publish()
            .times(2)
            .returning(|_, _| Err(StageError::transient("HTTP 502")));

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);
        let state = orchestrator.process_tweet(&tweet(104)).await;

        assert_eq!(state, TweetState::Failed);
        assert!(orchestrator.seen().contains(104));
    }

    #[tokio::test]
    async fn fatal_publish_failure_never_retries() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|_| Ok(source_video(45.0)));

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .returning(|_| Ok(PathBuf::from("processed/clip_3.mp4")));

        let mut uploader = MockUploader::new();
        uploader
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(StageError::fatal("session expired")));

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);
        let state = orchestrator.process_tweet(&tweet(105)).await;

        assert_eq!(state, TweetState::Failed);
        assert!(orchestrator.seen().contains(105));
    }

    #[tokio::test]
    async fn dry_run_renders_but_never_publishes() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|_| Ok(source_video(30.0)));

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(1)
            .returning(|_| Ok(PathBuf::from("processed/clip_4.mp4")));

        let mut uploader = MockUploader::new();
        uploader.expect_publish().never();

        let mut orchestrator =
            orchestrator_with(downloader, renderer, uploader, &dir).with_dry_run(true);
        let state = orchestrator.process_tweet(&tweet(106)).await;

        assert_eq!(state, TweetState::Done);
        assert!(orchestrator.seen().contains(106));
    }

    #[tokio::test]
    async fn tweet_without_video_fails_without_downloading() {
        let dir = tempfile::tempdir().unwrap();

        let mut downloader = MockDownloader::new();
        downloader.expect_download().never();

        let mut renderer = MockRenderer::new();
        renderer.expect_render().never();

        let mut uploader = MockUploader::new();
        uploader.expect_publish().never();

        let mut orchestrator = orchestrator_with(downloader, renderer, uploader, &dir);

        let mut no_video = tweet(107);
        no_video.media_url = None;

        assert_eq!(orchestrator.process_tweet(&no_video).await, TweetState::Failed);
        assert!(orchestrator.seen().contains(107));
    }
}
