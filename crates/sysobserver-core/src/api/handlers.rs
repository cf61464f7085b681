//! API handlers for the control surface

use axum::{extract::State, http::StatusCode, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collector::{HostProbe, SystemInfo};
use crate::error::Error;
use crate::models::{ObserverStatus, StartOutcome, StopOutcome};
use crate::observer::Observer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the observer task
    pub observer: Observer,
    /// Shared sysinfo handle for snapshots
    pub probe: HostProbe,
    /// Whether `/api/v1/system` queries GPUs
    pub gpu: bool,
    /// Recorder rendered on `/metrics`
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// State without a metrics recorder
    pub fn new(observer: Observer, probe: HostProbe) -> Self {
        Self {
            observer,
            probe,
            gpu: true,
            prometheus: None,
        }
    }

    /// Render `/metrics` from this recorder
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Include GPUs in system snapshots
    pub fn with_gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn api_error(e: Error) -> (StatusCode, String) {
    warn!(error = %e, "Control request failed");
    let status = match e {
        Error::Observer(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Ping response
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub pong: bool,
    pub host: String,
}

/// Liveness probe that names the host
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        pong: true,
        host: state.observer.host().to_string(),
    })
}

/// Result of a start/stop request
#[derive(Debug, Serialize, Deserialize)]
pub struct OutcomeResponse<T> {
    pub outcome: T,
}

/// Current observer status
pub async fn observer_status(State(state): State<AppState>) -> ApiResult<ObserverStatus> {
    state.observer.status().await.map(Json).map_err(api_error)
}

/// Start the observer loop
pub async fn start_observer(
    State(state): State<AppState>,
) -> ApiResult<OutcomeResponse<StartOutcome>> {
    let outcome = state.observer.start().await.map_err(api_error)?;
    Ok(Json(OutcomeResponse { outcome }))
}

/// Stop the observer loop
pub async fn stop_observer(
    State(state): State<AppState>,
) -> ApiResult<OutcomeResponse<StopOutcome>> {
    let outcome = state.observer.stop().await.map_err(api_error)?;
    Ok(Json(OutcomeResponse { outcome }))
}

/// Snapshot of the local machine
pub async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo::collect(&state.probe, state.gpu).await)
}

/// Prometheus exposition of the observer's own counters
pub async fn prometheus_metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{ExceedanceTracker, LogSink};
    use crate::api::create_router;
    use crate::collector::ScriptedSource;
    use crate::models::{MetricDescriptor, ThresholdConfig};
    use crate::observer::{MonitoredMetric, ObserverContext};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, Observer) {
        let metric = MonitoredMetric::new(
            MetricDescriptor {
                id: "mem".to_string(),
                label: "Memory".to_string(),
                unit: "%".to_string(),
                thresholds: ThresholdConfig::new(85.0, 95.0, 100.0),
            },
            Arc::new(ScriptedSource::values("mem", [10.0; 8])),
        )
        .unwrap();
        let context = ObserverContext::new(
            "box",
            Duration::from_secs(300),
            ExceedanceTracker::default(),
            vec![metric],
        );
        let observer = Observer::spawn(context, Arc::new(LogSink), false);
        let state = AppState::new(observer.clone(), HostProbe::new()).with_gpu(false);
        (create_router(state), observer)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ping_names_host() {
        let (app, _) = app();
        let (_, body) = call(&app, "GET", "/ping").await;
        assert_eq!(body["pong"], true);
        assert_eq!(body["host"], "box");
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let (app, _) = app();

        let (status, body) = call(&app, "POST", "/api/v1/observer/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "started");

        let (_, body) = call(&app, "POST", "/api/v1/observer/start").await;
        assert_eq!(body["outcome"], "already_running");

        let (_, body) = call(&app, "GET", "/api/v1/observer/status").await;
        assert_eq!(body["running"], true);
        assert_eq!(body["metrics"][0]["id"], "mem");

        let (_, body) = call(&app, "POST", "/api/v1/observer/stop").await;
        assert_eq!(body["outcome"], "stopped");

        let (_, body) = call(&app, "POST", "/api/v1/observer/stop").await;
        assert_eq!(body["outcome"], "not_running");
    }

    #[tokio::test]
    async fn test_closed_observer_is_unavailable() {
        let (app, observer) = app();
        observer.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        let (status, _) = call(&app, "GET", "/api/v1/observer/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (app, _) = app();
        let (status, _) = call(&app, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_system_snapshot() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/api/v1/system").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["host"].is_string());
        assert!(body["gpus"].as_array().unwrap().is_empty());
    }
}
