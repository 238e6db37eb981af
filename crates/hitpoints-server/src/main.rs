//! hitpoints server
//!
//! Counts tracking-pixel hits per page in memory, checkpoints them locally
//! and archives them to the configured storage on a schedule.
//!
//! Config path: first CLI argument, else `$HITPOINTS_CONFIG`, else
//! `hitpoints.yaml` (all defaults when that file does not exist).

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hitpoints_core::error::{HitError, Result};
use hitpoints_server::{app_state::AppState, config, router};

const DEFAULT_CONFIG: &str = "hitpoints.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HITPOINTS_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = config::load_or_default(&path)?;

    let state = AppState::new(cfg)?;
    let listen: SocketAddr = state
        .cfg()
        .server
        .listen
        .parse()
        .map_err(|e| HitError::Config(format!("server.listen must be a valid SocketAddr: {e}")))?;

    state.start();
    let app = router::build_router(state.clone());

    tracing::info!(%listen, config = %path, "hitpoints starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| HitError::Internal(format!("failed to bind {listen}: {e}")))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Drain and checkpoint even when the server loop failed.
    state.shutdown().await;
    served.map_err(|e| HitError::Internal(format!("server failed: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("signal received, starting graceful shutdown");
}
