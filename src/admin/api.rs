use axum::{
  body::Bytes,
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{
  CacheConfig, CacheError, CacheManager, CacheMetrics, CacheStatus, Event, HealthStatus,
  HealthSummary, Mode, OpContext, SelfTestReport,
};
use crate::server::ServerConfig;

const DEFAULT_EVENT_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
  pub cache: Arc<CacheManager>,
  pub start_time: std::time::Instant,
}

pub struct AdminServer {
  cache: Arc<CacheManager>,
  shutdown_rx: broadcast::Receiver<()>,
  config: ServerConfig,
}

impl AdminServer {
  pub fn new(
    cache: Arc<CacheManager>,
    shutdown_rx: broadcast::Receiver<()>,
    config: ServerConfig,
  ) -> Self {
    Self {
      cache,
      shutdown_rx,
      config,
    }
  }

  pub async fn run(mut self, addr: &str) -> Result<(), anyhow::Error> {
    let app = router(self.cache.clone(), &self.config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Cache admin API at http://{}", addr);

    axum::serve(listener, app.into_make_service())
      .with_graceful_shutdown(async move {
        let _ = self.shutdown_rx.recv().await;
        tracing::info!("Admin server shutting down");
      })
      .await?;
    Ok(())
  }
}

/// Build the admin router over `cache`.
pub fn router(cache: Arc<CacheManager>, cors_origins: &[String]) -> Router {
  let state = AppState {
    cache,
    start_time: std::time::Instant::now(),
  };

  let cache_routes = Router::new()
    .route("/status", get(api_cache_status))
    .route("/health", get(api_cache_health))
    .route("/metrics", get(api_cache_metrics))
    .route("/events", get(api_cache_events))
    .route("/config", get(api_cache_config))
    .route("/fallback", post(api_force_fallback))
    .route("/reset", post(api_reset_counters))
    .route("/test", post(api_test_cache));

  // Build CORS layer based on config
  let cors = if cors_origins.is_empty() || cors_origins.iter().any(|o| o == "*") {
    CorsLayer::permissive()
  } else {
    let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
      .allow_origin(origins)
      .allow_methods(Any)
      .allow_headers(Any)
  };

  Router::new()
    // Health endpoints (no /api prefix for k8s probes)
    .route("/health", get(health_check))
    .route("/ready", get(readiness_check))
    .route("/api/status", get(api_status))
    .nest("/api/cache", cache_routes)
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
  name: &'static str,
  version: &'static str,
  mode: Mode,
  uptime_secs: u64,
}

async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
  Json(StatusResponse {
    name: "burrow",
    version: env!("CARGO_PKG_VERSION"),
    mode: state.cache.mode(),
    uptime_secs: state.start_time.elapsed().as_secs(),
  })
}

/// Liveness probe - returns 200 if server is running
async fn health_check() -> StatusCode {
  StatusCode::OK
}

/// Readiness probe - returns 503 while the cache reports itself unhealthy
async fn readiness_check(State(state): State<AppState>) -> StatusCode {
  match state.cache.health().overall_health {
    HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    _ => StatusCode::OK,
  }
}

async fn api_cache_status(State(state): State<AppState>) -> Json<CacheStatus> {
  Json(state.cache.status().await)
}

fn health_code(status: HealthStatus) -> StatusCode {
  match status {
    HealthStatus::Healthy => StatusCode::OK,
    HealthStatus::Degraded => StatusCode::PARTIAL_CONTENT,
    HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
  }
}

async fn api_cache_health(State(state): State<AppState>) -> (StatusCode, Json<HealthSummary>) {
  let summary = state.cache.health();
  (health_code(summary.overall_health), Json(summary))
}

async fn api_cache_metrics(State(state): State<AppState>) -> Json<CacheMetrics> {
  Json(state.cache.metrics().await)
}

#[derive(Deserialize)]
struct EventsQuery {
  limit: Option<String>,
}

#[derive(Serialize)]
struct EventsResponse {
  events: Vec<Event>,
  count: usize,
  limit: usize,
}

/// Invalid or non-positive limits fall back to the default.
async fn api_cache_events(
  State(state): State<AppState>,
  Query(q): Query<EventsQuery>,
) -> Json<EventsResponse> {
  let limit = q
    .limit
    .and_then(|l| l.trim().parse::<usize>().ok())
    .filter(|l| *l > 0)
    .unwrap_or(DEFAULT_EVENT_LIMIT);
  let events = state.cache.events(limit);
  Json(EventsResponse {
    count: events.len(),
    events,
    limit,
  })
}

async fn api_cache_config(State(state): State<AppState>) -> Json<CacheConfig> {
  Json(state.cache.config().clone())
}

#[derive(Deserialize)]
struct FallbackRequest {
  #[serde(default)]
  reason: Option<String>,
}

/// Body is optional: `{"reason": "..."}`.
async fn api_force_fallback(
  State(state): State<AppState>,
  body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
  let reason = if body.iter().all(u8::is_ascii_whitespace) {
    None
  } else {
    let req: FallbackRequest = serde_json::from_slice(&body)
      .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
    req.reason.filter(|r| !r.trim().is_empty())
  };

  let mode = state.cache.force_fallback(reason.as_deref());
  tracing::info!(reason = ?reason, "Fallback forced through admin API");
  Ok(Json(serde_json::json!({
    "success": true,
    "mode": mode,
    "message": "Fallback mode enabled",
  })))
}

async fn api_reset_counters(State(state): State<AppState>) -> Json<serde_json::Value> {
  state.cache.reset_counters();
  Json(serde_json::json!({
    "success": true,
    "message": "Cache counters reset",
    "mode": state.cache.mode(),
  }))
}

async fn api_test_cache(State(state): State<AppState>) -> Result<Json<SelfTestReport>, AppError> {
  let report = state.cache.self_test(&OpContext::background()).await?;
  Ok(Json(report))
}

#[derive(Debug)]
enum AppError {
  Internal(CacheError),
  BadRequest(String),
}

impl From<CacheError> for AppError {
  fn from(e: CacheError) -> Self {
    Self::Internal(e)
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, msg) = match self {
      Self::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
      Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
    };
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn test_cache_error_renders_as_internal() {
    let (status, body) = render(AppError::from(CacheError::Cancelled)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "operation cancelled");
  }

  #[tokio::test]
  async fn test_bad_request_keeps_message() {
    let (status, body) = render(AppError::BadRequest("Invalid request body: eof".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request body: eof");
  }
}
