use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::watch};
use tracing::{debug, error, info};

use ticket_market as market;
use ticket_market::notifications::{spawn_delivery, ChannelNotificationSink, Notification};

const DELIVERY_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = market::config::load_config().context("failed to load configuration")?;
    market::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = market::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        market::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Notification delivery is out of process; drain the channel into the log.
    let (sink, notifications) = ChannelNotificationSink::channel(cfg.notification_channel_capacity);
    let delivery = spawn_delivery(notifications, log_notification);

    let core = market::TicketingCore::from_config(db.clone(), &cfg, Arc::new(sink));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(core.sweeper().run(cfg.expiry_sweep_interval(), shutdown_rx));

    info!(
        environment = %cfg.environment,
        payment_window_hours = cfg.payment_window_hours,
        "ticket-market core running"
    );

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "Expiry sweeper task panicked");
    }
    // The core holds the last sink senders; dropping it closes the channel
    // and lets the delivery task drain what is still queued.
    drop(core);
    match tokio::time::timeout(DELIVERY_DRAIN_TIMEOUT, delivery).await {
        Ok(Ok(delivered)) => debug!(delivered, "Notification queue drained"),
        Ok(Err(e)) => error!(error = %e, "Notification delivery task panicked"),
        Err(_) => error!("Timed out draining queued notifications"),
    }

    match Arc::try_unwrap(db) {
        Ok(pool) => market::db::close(pool)
            .await
            .context("failed to close database pool")?,
        Err(_) => debug!("Database pool still shared at shutdown; dropping"),
    }

    info!("ticket-market stopped");
    Ok(())
}

fn log_notification(notification: &Notification) {
    info!(target: "ticket_market::delivery", kind = notification.kind(), ?notification, "Delivering notification");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
