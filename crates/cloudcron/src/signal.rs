use cloudcron_scheduler::ReloadHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
            return;
        }
        info!("Received SIGINT (Ctrl+C)");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM");
            }
            Err(error) => {
                warn!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Cancel `cancel` on shutdown signals; set `reload` on SIGHUP.
pub fn spawn_handlers(cancel: CancellationToken, reload: ReloadHandle) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(mut hangup) => {
                while hangup.recv().await.is_some() {
                    info!("Received SIGHUP, crontab reload requested");
                    reload.request();
                }
            }
            Err(error) => warn!(error = %error, "Failed to install SIGHUP handler"),
        }
    });

    #[cfg(not(unix))]
    drop(reload);
}
