use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, sourced from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Twitter/X account and credentials
    pub twitter: TwitterConfig,

    /// TikTok session settings
    pub tiktok: TikTokConfig,

    /// Clip rendering settings
    pub video: VideoConfig,

    /// Bot loop and filesystem settings
    pub bot: BotConfig,
}

#[derive(Debug, Clone)]
pub struct TwitterConfig {
    /// Account handle to monitor, without the leading @
    pub username: String,

    /// API v2 bearer token; required for the monitor loop
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TikTokConfig {
    /// JSON file with session cookies exported from a logged-in browser
    pub cookies_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Shortest clip worth publishing, in seconds
    pub min_clip_secs: f64,

    /// Longest clip to cut, in seconds
    pub max_clip_secs: f64,

    /// Output frame width
    pub target_width: u32,

    /// Output frame height
    pub target_height: u32,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Lower bound of the randomized pause between polls
    pub check_interval_min: Duration,

    /// Upper bound of the randomized pause between polls
    pub check_interval_max: Duration,

    /// Where downloaded source videos land
    pub downloads_dir: PathBuf,

    /// Where finished clips land
    pub processed_dir: PathBuf,

    /// Where bot state (seen tweets, cookies) lives
    pub data_dir: PathBuf,

    /// Hashtags appended to every published caption
    pub default_hashtags: Vec<String>,

    /// Narration voice name or full edge-tts voice id
    pub voice: String,
}

impl TwitterConfig {
    pub fn has_api_credentials(&self) -> bool {
        self.bearer_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl Config {
    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let data_dir = match env_var("DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => Self::default_data_dir()?,
        };

        let cookies_file = env_var("TIKTOK_COOKIES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("tiktok_cookies.json"));

        let config = Self {
            twitter: TwitterConfig {
                username: env_var("TWITTER_USERNAME").unwrap_or_else(|| "EmergenciasMad".to_string()),
                bearer_token: env_var("TWITTER_BEARER_TOKEN"),
            },
            tiktok: TikTokConfig { cookies_file },
            video: VideoConfig {
                min_clip_secs: env_parse("MIN_CLIP_DURATION", 15.0)?,
                max_clip_secs: env_parse("MAX_CLIP_DURATION", 60.0)?,
                target_width: 1080,
                target_height: 1920,
            },
            bot: BotConfig {
                check_interval_min: Duration::from_secs(env_parse("CHECK_INTERVAL_MIN_SECS", 60u64)?),
                check_interval_max: Duration::from_secs(env_parse("CHECK_INTERVAL_MAX_SECS", 3600u64)?),
                downloads_dir: env_var("DOWNLOADS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("downloads")),
                processed_dir: env_var("PROCESSED_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("processed")),
                data_dir,
                default_hashtags: env_var("DEFAULT_HASHTAGS")
                    .map(|raw| parse_hashtags(&raw))
                    .unwrap_or_else(default_hashtags),
                voice: env_var("TTS_VOICE").unwrap_or_else(|| "elena".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Create the directories the bot writes into
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.bot.downloads_dir, &self.bot.processed_dir, &self.bot.data_dir] {
            fs_err::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Default state directory
    fn default_data_dir() -> Result<PathBuf> {
        // A local ./data directory wins for easy testing
        let local = PathBuf::from("data");
        if local.exists() {
            return Ok(local);
        }

        let base = dirs::data_local_dir().context("Could not determine data directory")?;

        Ok(base.join("sucesos-bot"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.twitter.username.is_empty() {
            anyhow::bail!("TWITTER_USERNAME must not be empty");
        }

        if self.video.min_clip_secs <= 0.0 {
            anyhow::bail!("MIN_CLIP_DURATION must be positive");
        }

        if self.video.min_clip_secs > self.video.max_clip_secs {
            anyhow::bail!(
                "MIN_CLIP_DURATION ({}) exceeds MAX_CLIP_DURATION ({})",
                self.video.min_clip_secs,
                self.video.max_clip_secs
            );
        }

        if self.bot.check_interval_min.is_zero() {
            anyhow::bail!("CHECK_INTERVAL_MIN_SECS must be positive");
        }

        if self.bot.check_interval_min > self.bot.check_interval_max {
            anyhow::bail!("CHECK_INTERVAL_MIN_SECS exceeds CHECK_INTERVAL_MAX_SECS");
        }

        Ok(())
    }

    /// Display current configuration, with secrets masked
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Twitter account: @{}", self.twitter.username);
        println!(
            "  Bearer token: {}",
            if self.twitter.has_api_credentials() { "set" } else { "not set" }
        );
        println!("  TikTok cookies: {}", self.tiktok.cookies_file.display());
        println!(
            "  Clip length: {:.0}-{:.0}s",
            self.video.min_clip_secs, self.video.max_clip_secs
        );
        println!(
            "  Poll interval: {}-{}s",
            self.bot.check_interval_min.as_secs(),
            self.bot.check_interval_max.as_secs()
        );
        println!("  Downloads dir: {}", self.bot.downloads_dir.display());
        println!("  Processed dir: {}", self.bot.processed_dir.display());
        println!("  Data dir: {}", self.bot.data_dir.display());
        println!("  Narration voice: {}", self.bot.voice);
        println!("  Hashtags: {}", self.bot.default_hashtags.join(" "));
    }
}

fn default_hashtags() -> Vec<String> {
    ["#sucesoshoy", "#madrid", "#emergencias", "#ultimahora", "#noticias"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Split a hashtag list, tolerating missing # prefixes
fn parse_hashtags(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .map(|tag| {
            if tag.starts_with('#') {
                tag.to_string()
            } else {
                format!("#{tag}")
            }
        })
        .collect()
}

/// Read an environment variable, treating empty values as unset
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}")),
        None => Ok(default),
    }
}
