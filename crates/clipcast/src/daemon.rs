//! Long-running daemon: owns the scheduler and sweeps the intake directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use clipcast_publish::CommandPublisher;
use clipcast_scheduler::{JobStore, Scheduler};

use crate::config::Settings;
use crate::intake;

pub async fn run(
    settings: Settings,
    state_dir: PathBuf,
    intake_dir: PathBuf,
    poll_interval: u64,
) -> miette::Result<()> {
    if settings.platforms.is_empty() {
        warn!("no platforms configured, all submissions will be rejected");
    }
    for (name, platform) in &settings.platforms {
        if platform.command.is_empty() {
            warn!(
                platform = %name,
                "platform has no upload command, its uploads will fail"
            );
        }
    }

    let store = Arc::new(
        JobStore::open(&state_dir)
            .await
            .map_err(|e| miette::miette!("failed to open state directory: {}", e))?,
    );
    let publisher = Arc::new(CommandPublisher::new(settings.upload_commands()));
    let scheduler = Scheduler::open(store, publisher, settings.scheduler_config())
        .await
        .map_err(|e| miette::miette!("failed to start scheduler: {}", e))?;

    tokio::fs::create_dir_all(&intake_dir)
        .await
        .map_err(|e| miette::miette!("failed to create intake directory: {}", e))?;

    info!(
        state_dir = %state_dir.display(),
        intake_dir = %intake_dir.display(),
        "clipcast daemon starting"
    );

    // Requests dropped while the daemon was down are waiting in the intake
    // directory; apply them before the first poll.
    let queued = intake::drain(&intake_dir, &scheduler).await;
    if queued > 0 {
        info!(queued, "applied requests received while the daemon was down");
    }

    scheduler.start().await;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let mut interval = tokio::time::interval(Duration::from_secs(poll_interval.max(1)));
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = interval.tick() => {
                intake::drain(&intake_dir, &scheduler).await;
            }
        }
    }

    info!("draining in-flight uploads");
    scheduler.stop().await;
    info!("clipcast daemon stopped");

    Ok(())
}
