//! HTTP server exposing the pipeline operations

use crate::error::PipelineError;
use crate::feedback::FeedbackOutcome;
use crate::pipeline::{DetectionRun, Pipeline, TodayInsight};
use crate::types::{
    EatingContext, FoodEvent, Insight, InsightId, Mood, Pattern, PatternId, RiskScore, UserId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server address
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

impl From<&crate::config::ServerConfig> for ApiServerConfig {
    fn from(config: &crate::config::ServerConfig) -> Self {
        Self { addr: config.addr }
    }
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Pipeline error rendered as a JSON body with a matching status code
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        Self(PipelineError::InvalidId(err))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::InvalidInput(_) | PipelineError::InvalidId(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the router over a pipeline
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState { pipeline };

    Router::new()
        .route("/health", get(health_handler))
        .route("/users/:user_id/events", post(log_event_handler))
        .route("/users/:user_id/patterns", get(list_patterns_handler))
        .route("/users/:user_id/patterns/detect", post(detect_handler))
        .route("/users/:user_id/risk/today", get(risk_today_handler))
        .route("/users/:user_id/insights/today", get(insight_today_handler))
        .route("/patterns/:pattern_id/feedback", post(feedback_handler))
        .route("/insights/:insight_id/seen", post(insight_seen_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the listener fails
pub async fn serve(config: ApiServerConfig, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let router = build_router(pipeline);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("API server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct LogEventRequest {
    pub raw_text: String,
    #[serde(default)]
    pub calories: u32,
    pub mood: Option<Mood>,
    pub context: Option<EatingContext>,
    /// Defaults to the time the request is handled
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogEventResponse {
    pub event: FoodEvent,
    /// Present when this event triggered a detection run
    pub detection: Option<DetectionRun>,
}

async fn log_event_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<LogEventRequest>,
) -> std::result::Result<(StatusCode, Json<LogEventResponse>), ApiError> {
    let user_id = UserId::from_string(&user_id)?;
    let event = FoodEvent::new(
        user_id,
        req.raw_text,
        req.calories,
        req.mood,
        req.context,
        req.timestamp.unwrap_or_else(Utc::now),
    );
    let detection = state.pipeline.log_event(event.clone()).await?;
    Ok((StatusCode::CREATED, Json(LogEventResponse { event, detection })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PatternsQuery {
    /// Include deactivated patterns
    #[serde(default)]
    pub history: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PatternsResponse {
    /// True when any listed pattern comes from cold-start templates
    pub preliminary: bool,
    pub patterns: Vec<Pattern>,
}

async fn list_patterns_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PatternsQuery>,
) -> ApiResult<PatternsResponse> {
    let user_id = UserId::from_string(&user_id)?;
    let patterns = state.pipeline.list_patterns(user_id, query.history).await?;
    Ok(Json(PatternsResponse {
        preliminary: patterns.iter().any(|p| p.active && p.preliminary),
        patterns,
    }))
}

async fn detect_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<DetectionRun> {
    let user_id = UserId::from_string(&user_id)?;
    Ok(Json(state.pipeline.detect_patterns(user_id).await?))
}

async fn risk_today_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<RiskScore> {
    let user_id = UserId::from_string(&user_id)?;
    Ok(Json(state.pipeline.get_risk_today(user_id).await?))
}

async fn insight_today_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<TodayInsight> {
    let user_id = UserId::from_string(&user_id)?;
    Ok(Json(state.pipeline.get_today_insight(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub disputed: bool,
}

async fn feedback_handler(
    State(state): State<AppState>,
    Path(pattern_id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<FeedbackOutcome> {
    let pattern_id = PatternId::from_string(&pattern_id)?;
    Ok(Json(
        state
            .pipeline
            .submit_pattern_feedback(pattern_id, req.disputed)
            .await?,
    ))
}

async fn insight_seen_handler(
    State(state): State<AppState>,
    Path(insight_id): Path<String>,
) -> ApiResult<Insight> {
    let insight_id = InsightId::from_string(&insight_id)?;
    Ok(Json(state.pipeline.mark_insight_seen(insight_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::storage::MemoryStorage;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let store = Arc::new(MemoryStorage::new());
        build_router(Arc::new(Pipeline::new(PipelineConfig::default(), store)))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_server_config_default() {
        let config = ApiServerConfig::default();
        assert_eq!(config.addr.port(), 3000);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = health_handler().await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_bad_user_id_is_400() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/users/not-a-uuid/patterns")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid id"));
    }

    #[tokio::test]
    async fn test_unknown_pattern_feedback_is_404() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/patterns/{}/feedback", PatternId::new()))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"disputed": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_log_event_then_list_patterns() {
        let app = router();
        let user = UserId::new();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/users/{}/events", user))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"raw_text": "porridge", "calories": 350, "mood": "ok", "context": "home"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["event"]["raw_text"], "porridge");
        assert!(json["detection"].is_null());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/users/{}/patterns?history=true", user))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["preliminary"], false);
        assert_eq!(json["patterns"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_blank_event_text_is_400() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/users/{}/events", UserId::new()))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"raw_text": "   ", "calories": 10}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (PipelineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                PipelineError::UpstreamUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (PipelineError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
