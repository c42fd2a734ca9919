//! Manifest responder
//!
//! Serves the last manifest a watcher downloaded on `GET /sync`, so local
//! players can follow the stream without talking to the content store.

use crate::utils::error::{AppError, AppResult};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Raw bytes of the most recent manifest, empty until the first download
pub type ManifestCache = Arc<RwLock<Vec<u8>>>;

/// Build the responder's router
pub fn router(cache: ManifestCache) -> Router {
    Router::new()
        .route("/sync", get(serve_manifest))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(cache)
}

async fn serve_manifest(State(cache): State<ManifestCache>) -> impl IntoResponse {
    let body = cache.read().clone();
    ([(header::CONTENT_TYPE, "application/json")], body)
}

/// A running responder
pub struct ResponderHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    /// Address the listener actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Responder task ended abnormally: {}", e);
        }
        tracing::debug!("Responder on {} stopped", self.local_addr);
    }
}

/// Bind `addr` and serve `cache` in a background task
pub async fn spawn(addr: SocketAddr, cache: ManifestCache) -> AppResult<ResponderHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Responder(format!("cannot bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let server = axum::serve(listener, router(cache)).with_graceful_shutdown(async move {
        stop.cancelled().await;
    });

    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Responder error: {:?}", e);
        }
    });

    tracing::info!("Serving the manifest on http://{}/sync", local_addr);
    Ok(ResponderHandle {
        local_addr,
        shutdown,
        task,
    })
}
