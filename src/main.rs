use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sucesos_bot::downloader::{cleanup_old_downloads, YtDlpDownloader};
use sucesos_bot::uploader::TikTokUploader;
use sucesos_bot::{utils, Bot, Cli, Commands, Config, Orchestrator, Tweet, TweetState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; quiet trumps verbose when both are passed
    let default_filter = if cli.quiet {
        "sucesos_bot=warn"
    } else if cli.verbose {
        "sucesos_bot=debug"
    } else {
        "sucesos_bot=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run { once, dry_run } => run(once, dry_run).await?,
        Commands::Single { url, dry_run } => single(&url, dry_run).await?,
        Commands::Config => {
            let config = Config::from_env()?;
            config.display();
        }
        Commands::Check => check().await,
        Commands::Setup => setup().await?,
    }

    Ok(())
}

async fn run(once: bool, dry_run: bool) -> Result<()> {
    warn_about_missing_tools().await;

    let config = Config::from_env()?;
    config.ensure_dirs()?;
    sweep_downloads(&config);

    let mut bot = Bot::from_config(&config, dry_run)?;

    if once {
        let published = bot.run_once().await?;
        println!("Poll finished: {} clip(s) published", published);
        return Ok(());
    }

    let (tx, rx) = tokio::sync::watch::channel(false);
    let signal_task = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => {
                tracing::error!("cannot listen for Ctrl-C: {e}");
                // Hold the sender so the bot loop is never woken spuriously
                std::future::pending::<()>().await;
            }
        }
    });

    bot.run_forever(rx).await?;
    signal_task.abort();

    Ok(())
}

async fn single(url: &str, dry_run: bool) -> Result<()> {
    warn_about_missing_tools().await;

    let tweet_id = utils::tweet_id_from_url(url)?;

    let config = Config::from_env()?;
    config.ensure_dirs()?;

    // Best-effort text for the overlay and caption; the clip still gets
    // rendered when the probe has nothing to offer
    let text = match YtDlpDownloader::new(config.bot.downloads_dir.clone())
        .video_info(url)
        .await
    {
        Ok(info) => info.description.or(info.title).unwrap_or_default(),
        Err(e) => {
            tracing::warn!("could not probe tweet text: {e}");
            String::new()
        }
    };

    let tweet = Tweet {
        id: tweet_id,
        text,
        media_url: Some(url.to_string()),
        created_at: chrono::Utc::now(),
    };

    let mut orchestrator = Orchestrator::from_config(&config)?.with_dry_run(dry_run);

    match orchestrator.process_tweet(&tweet).await {
        TweetState::Done if dry_run => {
            println!("Dry run finished; the clip is in {}", config.bot.processed_dir.display());
        }
        TweetState::Done => println!("Tweet {} published", tweet_id),
        _ => {
            eprintln!("Tweet {} failed; see the log for details", tweet_id);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn check() {
    let tools: [(&str, bool, &str); 4] = [
        ("yt-dlp", true, "downloads tweet videos"),
        ("ffmpeg", true, "cuts and renders clips"),
        ("ffprobe", true, "reads video metadata (ships with ffmpeg)"),
        ("edge-tts", false, "narrates clips; without it they keep the original audio"),
    ];

    let mut missing_required = false;
    println!("External tools:");
    for (name, required, what) in tools {
        if utils::check_command_available(name).await {
            println!("  {} {:<10} {}", console::style("ok").green(), name, what);
        } else {
            let label = if required {
                missing_required = true;
                console::style("missing").red()
            } else {
                console::style("missing").yellow()
            };
            println!("  {} {:<10} {}", label, name, what);
        }
    }

    if missing_required {
        eprintln!("\nInstall the missing required tools before running the bot.");
        std::process::exit(1);
    }
}

async fn setup() -> Result<()> {
    let config = Config::from_env()?;

    println!("Checking TikTok session from {}", config.tiktok.cookies_file.display());
    println!("(export browser cookies for tiktok.com to that file while logged in)");

    let uploader = TikTokUploader::new(config.tiktok.cookies_file.clone())?;
    uploader.verify_session().await?;

    println!("{} TikTok session looks valid", console::style("ok").green());
    Ok(())
}

async fn warn_about_missing_tools() {
    let missing = utils::check_dependencies().await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}

fn sweep_downloads(config: &Config) {
    match cleanup_old_downloads(&config.bot.downloads_dir, std::time::Duration::from_secs(24 * 3600)) {
        Ok(0) => {}
        Ok(n) => tracing::info!("removed {} stale download(s)", n),
        Err(e) => tracing::warn!("download cleanup failed: {e:#}"),
    }
}
