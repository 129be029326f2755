//! Status HTTP server.
//!
//! Exposes the queue snapshot as JSON for observers (dashboards, scripts).
//! The snapshot is written only inside the scheduler's serialization
//! point; this server just reads it.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::progress::{QueueSnapshot, SharedSnapshot};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status
async fn get_status(State(snapshot): State<SharedSnapshot>) -> Json<QueueSnapshot> {
    let snapshot = snapshot.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(snapshot: SharedSnapshot) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(snapshot)
}

/// Runs the status HTTP server on 127.0.0.1 at the given port.
pub async fn run_status_server(snapshot: SharedSnapshot, port: u16) -> Result<(), ServerError> {
    let app = create_status_router(snapshot);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(ServerError::BindError)?;

    Ok(())
}
