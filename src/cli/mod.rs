use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sucesos-bot",
    about = "Sucesos Bot - Republish emergency-service tweet videos as TikTok clips",
    version,
    long_about = "Watches a Twitter/X account for tweets carrying video, cuts a short \
vertical clip with an uppercase text overlay and Spanish narration, and publishes the \
result to TikTok with a rewritten caption."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor the configured account and publish new video tweets
    Run {
        /// Poll a single time and exit instead of looping
        #[arg(long)]
        once: bool,

        /// Download and render but skip the TikTok publish step
        #[arg(long)]
        dry_run: bool,
    },

    /// Process one tweet by URL
    Single {
        /// Tweet URL (twitter.com or x.com status link)
        #[arg(value_name = "URL")]
        url: String,

        /// Download and render but skip the TikTok publish step
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration
    Config,

    /// Check that the external tools the bot shells out to are installed
    Check,

    /// Verify the stored TikTok session cookies
    Setup,
}
