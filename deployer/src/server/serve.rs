//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::DeployError;
use crate::server::handlers::{deploy_handler, health_handler, status_handler};
use crate::server::state::ServerState;
use crate::storage::settings::ServerSettings;

/// Routes with state and middleware attached
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/deploy", post(deploy_handler))
        .route("/deploy/health", get(health_handler))
        .route("/deploy/status/{id}", get(status_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::system(format!("Failed to bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::system(format!("HTTP server failed: {}", e)))
    });

    Ok(handle)
}
