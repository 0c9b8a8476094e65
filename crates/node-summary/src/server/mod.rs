mod error;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use node_summary_core::{RefreshCache, VersionCache};

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub summaries: Arc<RefreshCache>,
    pub versions: Arc<VersionCache>,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let api = Router::new()
        .route("/api/v1/summary", get(get_summary))
        .route("/api/v1/health", get(health))
        .route("/api/v1/version", get(get_version));

    Router::new()
        .merge(api)
        .route("/api", any(api_not_found))
        .route("/api/{*path}", any(api_not_found))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

#[derive(Deserialize)]
struct SummaryQuery {
    /// `false` returns the last completed summary without waiting for a
    /// refresh, even when it is stale.
    force_refresh: Option<bool>,
}

/// Aggregation errors are part of the payload, not an HTTP error status.
async fn get_summary(
    State(state): State<SharedState>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    let snapshot = state
        .summaries
        .get(query.force_refresh.unwrap_or(true))
        .await;
    Json(snapshot).into_response()
}

async fn health(State(state): State<SharedState>) -> Response {
    let snapshot = state.summaries.get(true).await;
    if snapshot.is_err() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(snapshot)).into_response()
    } else {
        Json(serde_json::json!({ "status": "ok" })).into_response()
    }
}

async fn get_version(State(state): State<SharedState>) -> Response {
    match state.versions.get_version().await {
        Ok(version) => Json(version).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "err": err })),
        )
            .into_response(),
    }
}

async fn api_not_found() -> error::AppError {
    error::AppError::NotFound("API route not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use node_summary_core::clock::ManualClock;
    use node_summary_core::rpc::methods;
    use node_summary_core::rpc::mock::MockRpc;
    use node_summary_core::{Aggregator, AggregatorConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_router(rpc: MockRpc) -> (Arc<MockRpc>, Router) {
        let rpc = Arc::new(rpc);
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let aggregator = Arc::new(Aggregator::new(
            rpc.clone(),
            clock,
            AggregatorConfig::default(),
        ));
        let state = AppState {
            summaries: Arc::new(RefreshCache::new(aggregator, Duration::from_secs(10))),
            versions: Arc::new(VersionCache::new(rpc.clone())),
        };
        (rpc, build_router(state))
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request must build"),
            )
            .await
            .expect("router should serve request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body must be readable");
        let json = serde_json::from_slice(&bytes).expect("response body must be valid JSON");
        (status, json)
    }

    #[tokio::test]
    async fn summary_endpoint_returns_snapshot() {
        let (_rpc, router) = test_router(MockRpc::builder().build());
        let (status, json) = get_json(&router, "/api/v1/summary").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["diff_epoch"], 397);
        assert_eq!(json["halving_epoch"], 4);
        assert_eq!(json["feerates"]["1"], 25.0);
        assert!(json["feerates"]["6"].is_null());
        assert!(json.get("err").is_none());
    }

    #[tokio::test]
    async fn summary_errors_are_payload_not_status() {
        let (_rpc, router) =
            test_router(MockRpc::builder().with_failure(methods::GET_PEER_INFO).build());
        let (status, json) = get_json(&router, "/api/v1/summary").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["err"]["method"], "getpeerinfo");
        assert_eq!(json.as_object().map(|o| o.len()), Some(2));
    }

    #[tokio::test]
    async fn unforced_summary_reuses_cached_snapshot() {
        let (rpc, router) = test_router(MockRpc::builder().build());
        get_json(&router, "/api/v1/summary").await;
        let (status, _) = get_json(&router, "/api/v1/summary?force_refresh=false").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(rpc.calls(methods::UPTIME), 1);
    }

    #[tokio::test]
    async fn health_reports_unavailable_on_error() {
        let (_rpc, router) = test_router(MockRpc::builder().with_failure(methods::UPTIME).build());
        let (status, json) = get_json(&router, "/api/v1/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["err"]["method"], "uptime");
        assert!(json["server_time"].is_u64());
    }

    #[tokio::test]
    async fn health_is_ok_when_summary_is() {
        let (_rpc, router) = test_router(MockRpc::builder().build());
        let (status, json) = get_json(&router, "/api/v1/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn version_endpoint_reports_subversion() {
        let (_rpc, router) =
            test_router(MockRpc::builder().with_subversion("/Satoshi:27.0.0/").build());
        let (status, json) = get_json(&router, "/api/v1/version").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["subversion"], "/Satoshi:27.0.0/");
    }

    #[tokio::test]
    async fn version_failure_is_service_unavailable() {
        let (_rpc, router) = test_router(
            MockRpc::builder()
                .with_failure(methods::GET_NETWORK_INFO)
                .build(),
        );
        let (status, json) = get_json(&router, "/api/v1/version").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["err"]["method"], "getnetworkinfo");
    }

    #[tokio::test]
    async fn unknown_api_route_returns_json_404() {
        let (_rpc, router) = test_router(MockRpc::builder().build());
        let (status, json) = get_json(&router, "/api/v1/does-not-exist").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json.get("error").and_then(serde_json::Value::as_str),
            Some("API route not found")
        );
    }
}
