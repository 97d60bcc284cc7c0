//! Live statistics endpoint
//!
//! Serves the headline counters of an in-progress run for dashboards and
//! monitoring tools.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::SharedStats;
use crate::report::RunSummary;

/// Errors that can occur when running the stats server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /stats
async fn get_stats(State(stats): State<SharedStats>) -> Json<RunSummary> {
    let summary = RunSummary::from_stats(&*stats.read().await);
    Json(summary)
}

/// Creates the axum Router with the stats endpoint
pub fn create_stats_router(stats: SharedStats) -> Router {
    Router::new().route("/stats", get(get_stats)).with_state(stats)
}

/// Runs the stats server on `listen` until `shutdown` fires.
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if the address is invalid or cannot be bound
pub async fn run_stats_server(
    listen: &str,
    stats: SharedStats,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|_| ServerError::InvalidAddress(listen.to_string()))?;
    let app = create_stats_router(stats);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Stats endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metrics::new_shared_stats;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn fetch(stats: SharedStats) -> (StatusCode, String) {
        let response = create_stats_router(stats)
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_get_stats_returns_summary() {
        let stats = new_shared_stats(8);
        {
            let mut aggregate = stats.write().await;
            aggregate.total_processed = 2;
            aggregate.success_count = 3;
            aggregate.error_count = 1;
            aggregate.error_counts.insert(ErrorKind::Timeout, 1);
        }

        let (status, body) = fetch(stats).await;
        assert_eq!(status, StatusCode::OK);

        let summary: RunSummary = serde_json::from_str(&body).unwrap();
        assert_eq!(summary.total_processed, 2);
        assert_eq!(summary.total_count, 8);
        assert_eq!(summary.percent_complete, 25.0);
        assert_eq!(summary.error_counts[&ErrorKind::Timeout], 1);
        assert!(body.contains("\"totalProcessed\""));
        assert!(body.contains("\"timeout\""));
    }

    #[tokio::test]
    async fn test_get_stats_empty_run() {
        let (status, body) = fetch(new_shared_stats(0)).await;
        assert_eq!(status, StatusCode::OK);
        let summary: RunSummary = serde_json::from_str(&body).unwrap();
        assert_eq!(summary.total_processed, 0);
        assert_eq!(summary.percent_complete, 100.0);
    }

    #[tokio::test]
    async fn test_invalid_listen_address() {
        let err = run_stats_server("not-an-address", new_shared_stats(0), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress(_)));
    }
}
