//! Sucesos Bot - republishes emergency-service tweet videos as TikTok clips
//!
//! This library watches a Twitter/X account for posts carrying video, downloads
//! the media, cuts a short vertical clip with a text overlay and synthesized
//! Spanish narration, and publishes the result to TikTok with a rewritten caption.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod monitor;
pub mod pipeline;
pub mod render;
pub mod rewriter;
pub mod tts;
pub mod twitter;
pub mod uploader;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use pipeline::{Bot, Orchestrator, TweetState};
pub use twitter::Tweet;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Failure classes a pipeline stage can report
///
/// The class decides what happens to the tweet being processed: transient
/// trouble is worth retrying, content trouble means the tweet itself cannot
/// be turned into a clip, and fatal trouble needs operator attention.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unprocessable content: {0}")]
    Content(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        StageError::Transient(msg.into())
    }

    pub fn content(msg: impl Into<String>) -> Self {
        StageError::Content(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        StageError::Fatal(msg.into())
    }

    /// Whether a retry could plausibly succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

/// Result type for pipeline stage operations
pub type StageResult<T> = std::result::Result<T, StageError>;
