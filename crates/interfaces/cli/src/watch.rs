use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use dirwatch_config::AppConfig;
use dirwatch_monitor::{Monitor, ScheduleSettings};

/// Run the monitor and the HTTP boundary until Ctrl-C.
pub async fn run(config: AppConfig, no_http: bool) -> Result<()> {
    let monitor = Monitor::from_config(&config)?;
    let schedule = ScheduleSettings::from_config(&config.schedule)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C; stop the process another way");
            std::future::pending::<()>().await;
        }
        info!("interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    let http = if config.server.enabled && !no_http {
        let listener = dirwatch_http::bind(&config.server.host, config.server.port)
            .await
            .with_context(|| {
                format!(
                    "binding http boundary on {}:{}",
                    config.server.host, config.server.port
                )
            })?;
        Some(tokio::spawn(dirwatch_http::serve(
            listener,
            monitor.clone(),
            shutdown_signal(shutdown_rx.clone()),
        )))
    } else {
        None
    };

    monitor.run(schedule, shutdown_signal(shutdown_rx)).await?;

    if let Some(task) = http {
        task.await??;
    }
    Ok(())
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
