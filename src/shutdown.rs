use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Drain in-flight runs cooperatively. Their state is already persisted
/// at every step boundary, so a parked run resumes under the same
/// run_id after restart.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let in_flight = state.runs.active_count().await;
    if in_flight == 0 {
        tracing::info!("No in-flight runs to drain");
        return;
    }

    tracing::info!(count = in_flight, "Draining in-flight runs");
    state.runs.shutdown(Duration::from_secs(30)).await;

    tracing::info!("Graceful shutdown complete");
}
