//! clipcast: scheduled clip publishing
//!
//! Main binary with subcommands:
//! - `daemon`: run the upload scheduler and intake watcher
//! - `submit`: queue a clip for one or more platforms
//! - `cancel`: cancel a pending upload
//! - `queue`: show pending uploads
//! - `history`: show finished uploads

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod daemon;
mod intake;

#[derive(Parser)]
#[command(name = "clipcast")]
#[command(about = "Scheduled clip publishing for social platforms", long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(
        long,
        env = "CLIPCAST_CONFIG",
        default_value = "clipcast.json",
        global = true
    )]
    config: PathBuf,

    /// State directory (overrides the config file)
    #[arg(long, env = "CLIPCAST_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload daemon (scheduler + intake watcher)
    Daemon {
        /// Intake poll interval in seconds
        #[arg(long, default_value = "5")]
        poll_interval: u64,
    },

    /// Queue a clip for publishing
    Submit {
        /// Clip file or URL to publish
        clip: String,

        /// Target platform (repeat for a staggered multi-platform batch)
        #[arg(long = "platform", required = true)]
        platforms: Vec<String>,

        /// Title, for platforms that use one
        #[arg(long)]
        title: Option<String>,

        /// Caption shown alongside the clip
        #[arg(long)]
        caption: Option<String>,

        /// Hashtags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Higher runs first among uploads due at the same time
        #[arg(long, default_value = "0")]
        priority: i32,
    },

    /// Cancel a pending upload
    Cancel {
        /// Job id printed by submit or queue
        job_id: String,
    },

    /// Show pending uploads, soonest first
    Queue {
        /// Only show this platform
        #[arg(long)]
        platform: Option<String>,
    },

    /// Show finished uploads, most recent first
    History {
        /// Only show this platform
        #[arg(long)]
        platform: Option<String>,

        /// Only show this outcome ("succeeded" or "failed")
        #[arg(long)]
        status: Option<String>,

        /// Maximum records to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "clipcast=info,clipcast_scheduler=info,clipcast_publish=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = config::Settings::load(&cli.config).await?;
    let state_dir = settings.resolve_state_dir(cli.state_dir.as_deref());
    let intake_dir = settings.resolve_intake_dir(&state_dir);

    match cli.command {
        Commands::Daemon { poll_interval } => {
            daemon::run(settings, state_dir, intake_dir, poll_interval).await
        }

        Commands::Submit {
            clip,
            platforms,
            title,
            caption,
            tags,
            priority,
        } => commands::submit(&intake_dir, &clip, &platforms, title, caption, tags, priority).await,

        Commands::Cancel { job_id } => commands::cancel(&intake_dir, &job_id).await,

        Commands::Queue { platform } => commands::queue(&state_dir, platform.as_deref()).await,

        Commands::History {
            platform,
            status,
            limit,
        } => commands::history(&state_dir, platform.as_deref(), status.as_deref(), limit).await,
    }
}
