use admin_tally::*;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let (notify_tx, _) =
        broadcast::channel::<event::Notification>(app_config.publishing.broadcast_capacity);
    let (commands_tx, commands_rx) = mpsc::channel(app_config.feed.command_capacity);

    let mut catalog = catalog::Catalog::new();
    for init in app_config.resources.iter().cloned() {
        let key = init.key();
        feed::register_with_broadcast(&mut catalog, init, &notify_tx)
            .map_err(|e| anyhow::anyhow!("seed resource {}: {}", key, e))?;
    }
    catalog.pump();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let feed_handle = feed::spawn(
        feed::FeedDeps {
            catalog,
            commands_rx,
            notify_tx: notify_tx.clone(),
            shutdown_rx,
        },
        feed::FeedConfig {
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
        },
    );

    let app = routes::app(
        feed::CatalogHandle::new(commands_tx),
        notify_tx,
        Arc::new(AtomicUsize::new(0)),
    );
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = feed_handle.await;
        }
    }

    Ok(())
}
