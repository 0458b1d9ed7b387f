//! Server setup and routing.

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, shutdown::shutdown_signal, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/completion/{persona}",
            post(handlers::completion::handle_completion),
        )
        .route("/health", get(handlers::health::handle_health))
        .route("/personas", get(handlers::personas::handle_personas))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until SIGINT/SIGTERM or until `state.shutdown` is cancelled.
///
/// Shutdown cancels every session token, so open streams finish with
/// `done` and the server drains.
pub async fn run_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => {}
                () = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await
}
