use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Clone)]
struct Uptime(Instant);

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(Uptime(Instant::now()))
}

async fn index() -> &'static str {
    "candlebot running"
}

async fn health(State(uptime): State<Uptime>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": uptime.0.elapsed().as_secs(),
    }))
}

/// Liveness endpoint for hosting platforms that reap idle processes.
/// Runs until the shutdown signal fires. Bind failures are logged, not fatal.
pub async fn serve(port: u16, mut shutdown: broadcast::Receiver<()>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Keep-alive listener on {addr} failed: {e}");
            return;
        }
    };
    info!("Keep-alive listening on http://{addr}");

    let result = axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;
    if let Err(e) = result {
        error!("Keep-alive server stopped: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_ok() {
        let Json(body) = health(State(Uptime(Instant::now()))).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(index().await, "candlebot running");
    }
}
