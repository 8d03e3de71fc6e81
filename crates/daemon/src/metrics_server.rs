//! Metrics HTTP Server for the ingestion runner
//!
//! Exposes queue/job metrics via HTTP endpoint for monitoring and the TUI.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::metrics::{RunnerSnapshot, SharedMetrics};

/// Errors that can occur when running the metrics server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /metrics endpoint
/// Returns the current RunnerSnapshot as JSON
async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<RunnerSnapshot> {
    let snapshot = metrics.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with metrics endpoint
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

/// Runs the metrics HTTP server on the configured bind address.
///
/// # Arguments
/// * `metrics` - Shared metrics state to serve
/// * `bind_addr` - Address to bind, e.g. "127.0.0.1:7878"
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if server fails to start
pub async fn run_metrics_server(metrics: SharedMetrics, bind_addr: &str) -> Result<(), ServerError> {
    let app = create_metrics_router(metrics);
    let addr: SocketAddr = bind_addr
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7878)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.map_err(ServerError::BindError)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{new_shared_metrics, JobSnapshot, SystemMetrics};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_metrics_returns_json() {
        let metrics = new_shared_metrics();
        {
            let mut snapshot = metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.queue_len = 5;
            snapshot.running_jobs = 1;
            snapshot.system = SystemMetrics {
                cpu_usage_percent: 85.2,
                mem_usage_percent: 42.1,
                load_avg_1: 27.5,
                load_avg_5: 26.8,
                load_avg_15: 25.2,
            };
            snapshot.jobs.push(JobSnapshot {
                id: "ABC-001".to_string(),
                kind: "source".to_string(),
                status: "running".to_string(),
            });
        }

        let app = create_metrics_router(metrics.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response
            .headers()
            .get("content-type")
            .expect("should have content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let snapshot: RunnerSnapshot =
            serde_json::from_slice(&body).expect("should deserialize to RunnerSnapshot");

        assert_eq!(snapshot.timestamp_unix_ms, 1701388800000);
        assert_eq!(snapshot.queue_len, 5);
        assert_eq!(snapshot.running_jobs, 1);
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].id, "ABC-001");
    }

    #[tokio::test]
    async fn test_get_metrics_empty_snapshot() {
        let metrics = new_shared_metrics();
        let app = create_metrics_router(metrics);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let snapshot: RunnerSnapshot = serde_json::from_slice(&body).unwrap();

        assert_eq!(snapshot.timestamp_unix_ms, 0);
        assert_eq!(snapshot.jobs.len(), 0);
        assert_eq!(snapshot.queue_len, 0);
        assert_eq!(snapshot.running_jobs, 0);
    }

    #[tokio::test]
    async fn test_metrics_json_format_matches_shape() {
        let metrics = new_shared_metrics();
        {
            let mut snapshot = metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.system = SystemMetrics {
                cpu_usage_percent: 85.2,
                mem_usage_percent: 42.1,
                load_avg_1: 27.5,
                load_avg_5: 26.8,
                load_avg_15: 25.2,
            };
        }

        let app = create_metrics_router(metrics);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json_str = String::from_utf8(body.to_vec()).unwrap();

        assert!(json_str.contains("timestamp_unix_ms"));
        assert!(json_str.contains("jobs"));
        assert!(json_str.contains("system"));
        assert!(json_str.contains("queue_len"));
        assert!(json_str.contains("running_jobs"));
    }
}
