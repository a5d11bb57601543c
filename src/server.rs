use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::http;
use crate::AppState;

/// Builds the debug router: stats snapshot and a liveness probe.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/debug/vars", get(http::get_stats))
        .route("/health", get(http::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the debug router on `addr` in the background.
/// A failure to bind is logged; the worker keeps running without it.
pub fn spawn(addr: SocketAddr, state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "could not bind stats endpoint");
                return;
            }
        };

        info!("serving stats in http://{addr}/debug/vars");
        if let Err(e) = axum::serve(listener, create_router(state)).await {
            error!(error = %e, "stats server exited with error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StatsRegistry;

    #[tokio::test]
    async fn serves_stats_snapshot() {
        let state = Arc::new(AppState {
            stats: Arc::new(StatsRegistry::new()),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /debug/vars HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"n_metrics\":0"));
    }
}
