//! The HTTP and WebSocket surface of the download service.

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tubedrop_core::Tubedrop;

pub mod error;
pub mod routes;
pub mod ws;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Tubedrop,
}

impl AppState {
    pub fn new(service: Tubedrop) -> Self {
        Self { service }
    }
}

/// Builds the router, serving `static_dir` for every path outside the API when given.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/api/download", post(routes::download))
        .route("/api/video-info", post(routes::video_info))
        .route("/api/file/{fetch_ref}", get(routes::file))
        .route("/api/jobs/{job_id}", get(routes::job))
        .route("/api/health", get(routes::health))
        .route("/ws", get(ws::handler))
        .with_state(state);

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// Serves `router` on `addr` until Ctrl-C.
pub async fn serve(router: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("tubedrop listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down...");
}
