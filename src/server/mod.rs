/// HTTP API for image-anchor.
///
/// A thin layer over the coordinator and verifier:
/// - `POST /upload` (multipart, field `image`) and `POST /anchor` (raw body)
/// - `POST /verify` with a fingerprint
/// - `GET /records`, `GET /records/{fingerprint}`
/// - `GET /`, `GET /health`
pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::Services;
use crate::error::AnchorError;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState, max_upload_bytes: usize) -> Router {
    // The browser front end is served from elsewhere.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::anchor_routes())
        .merge(routes::verify_routes())
        .with_state(Arc::new(state))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server and run until ctrl-c.
pub async fn serve(state: AppState, addr: &str, max_upload_bytes: usize) -> crate::error::Result<()> {
    let app = build_app(state, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AnchorError::Io)?;

    tracing::info!("image-anchor API server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(AnchorError::Io)?;

    Ok(())
}
