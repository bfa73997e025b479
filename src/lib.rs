//! Core library for the contract audit service.  This module wires the
//! upload gate, the model provider and the history store into the HTTP
//! handlers for `POST /analyze` and `GET /history`.

mod config;
pub mod auth;
pub mod error;
pub mod history;
pub mod metrics;
pub mod model;
pub mod payload;
pub mod provider;
pub mod telemetry;
pub mod validation;

pub use config::{default_request_limit, AppConfig};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection, QueryRejection},
    DefaultBodyLimit, Query, State,
};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, DisabledAuthenticator, RemoteAuthenticator, StaticTokenAuthenticator};
use crate::error::ApiError;
use crate::history::{ConvexHistoryStore, HistoryStore, MemoryHistoryStore};
use crate::metrics::{inc, Metrics};
use crate::model::{AnalysisHistoryItem, AnalysisResult};
use crate::provider::{AnalysisProvider, OpenAiProvider};
use crate::telemetry::{AnalyzeEvent, AnalyzeOutcome, EventLog, RotatingWriter};
use crate::validation::{validate_upload, UploadLimits, ValidationError};

/// One uploaded file as sent by the browser.  `base64` may be a bare
/// payload or a full `data:` URI.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisRequestFile {
    pub base64: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalyzeRequest {
    pub files: Vec<AnalysisRequestFile>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryResponse {
    pub history: Vec<AnalysisHistoryItem>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
}

/// Reads the `limit` query value. Any run of digits is accepted and saturates,
/// and a negative integer counts as zero, so only non-integers are refused.
fn parse_limit(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if negative {
        return Some(0);
    }
    Some(digits.parse::<u32>().unwrap_or(u32::MAX))
}

/// Shared handles cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn AnalysisProvider>,
    pub auth: Arc<dyn Authenticator>,
    pub history: Arc<dyn HistoryStore>,
    pub limits: Arc<UploadLimits>,
    pub max_request_bytes: usize,
    pub events: EventLog,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// State with default upload limits and no event log file.
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        auth: Arc<dyn Authenticator>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let limits = UploadLimits::default();
        Self {
            provider,
            auth,
            history,
            max_request_bytes: default_request_limit(&limits),
            limits: Arc::new(limits),
            events: EventLog::default(),
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Replace the upload limits and resize the body cap to match.
    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.max_request_bytes = default_request_limit(&limits);
        self.limits = Arc::new(limits);
        self
    }

    pub fn with_max_request_bytes(mut self, max_request_bytes: usize) -> Self {
        self.max_request_bytes = max_request_bytes;
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }
}

/// Build state from environment variables.  See [`AppConfig::from_env`]
/// for the variables read.
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    build_state(AppConfig::from_env()?)
}

pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let AppConfig {
        provider,
        auth_tokens,
        auth_verify_url,
        auth_timeout_ms,
        history_store,
        limits,
        max_request_bytes,
        log_file,
        rotation,
        log_stdout,
    } = config;

    if provider.api_key.is_none() {
        tracing::warn!("AI_GATEWAY_API_KEY / OPENAI_API_KEY not set; analyze requests will fail");
    }
    let provider: Arc<dyn AnalysisProvider> = Arc::new(OpenAiProvider::new(provider)?);

    let auth: Arc<dyn Authenticator> = match (auth_verify_url, auth_tokens) {
        (Some(url), tokens) => {
            if tokens.is_some() {
                tracing::warn!("AUTH_VERIFY_URL is set; ignoring AUTH_TOKENS");
            }
            Arc::new(RemoteAuthenticator::new(url, auth_timeout_ms)?)
        }
        (None, Some(tokens)) => Arc::new(StaticTokenAuthenticator::new(tokens)),
        (None, None) => {
            tracing::warn!("Authentication disabled: neither AUTH_VERIFY_URL nor AUTH_TOKENS set; every request is rejected");
            Arc::new(DisabledAuthenticator)
        }
    };

    let history: Arc<dyn HistoryStore> = match history_store {
        Some(cfg) => Arc::new(ConvexHistoryStore::new(cfg)?),
        None => {
            tracing::warn!("HISTORY_STORE_URL not set; history is kept in memory and lost on restart");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let writer = match log_file.as_deref() {
        Some(path) => match RotatingWriter::open(path, rotation) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to open LOG_FILE; event log disabled");
                None
            }
        },
        None => None,
    };

    Ok(AppState::new(provider, auth, history)
        .with_limits(limits)
        .with_max_request_bytes(max_request_bytes)
        .with_event_log(EventLog::new(writer, log_stdout)))
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    Router::new()
        .route("/analyze", post(analyze_handler))
        .route("/history", get(history_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// What the event log records about a request, filled in as the handler
/// gets further.
#[derive(Default)]
struct AnalyzeTrace {
    user_id: Option<String>,
    file_count: usize,
    total_bytes: usize,
}

async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    inc(&state.metrics.analyze_requests_total);

    let mut trace = AnalyzeTrace::default();
    let result = run_analysis(&state, &headers, payload, &mut trace).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    state.metrics.observe_analyze_latency(latency_ms);

    let (outcome, detail) = match &result {
        Ok(_) => (AnalyzeOutcome::Success, None),
        Err(err) => (outcome_of(err), Some(err.to_string())),
    };
    state.events.analyze(&AnalyzeEvent {
        user_id: trace.user_id.as_deref(),
        outcome,
        file_count: trace.file_count,
        total_bytes: trace.total_bytes,
        latency_ms,
        detail: detail.as_deref(),
    });

    match result {
        Ok(analysis) => {
            inc(&state.metrics.analyze_success_total);
            (StatusCode::OK, Json(analysis)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn run_analysis(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
    trace: &mut AnalyzeTrace,
) -> Result<AnalysisResult, ApiError> {
    let user_id = authenticate(state, headers).await?;
    trace.user_id = Some(user_id.clone());

    let Json(request) = payload.map_err(|rejection| {
        inc(&state.metrics.validation_rejections_total);
        json_rejection_error(state, rejection)
    })?;
    trace.file_count = request.files.len();

    let documents = validate_upload(&request.files, &state.limits).map_err(|err| {
        inc(&state.metrics.validation_rejections_total);
        tracing::info!(user_id = %user_id, error = %err, "upload rejected");
        ApiError::from(err)
    })?;
    trace.total_bytes = documents.iter().map(|d| d.decoded_bytes).sum();

    let analysis = state.provider.analyze(&documents).await.map_err(|err| {
        inc(&state.metrics.provider_failures_total);
        tracing::warn!(
            user_id = %user_id,
            provider = state.provider.name(),
            error = %err,
            "analysis failed"
        );
        ApiError::from(err)
    })?;

    tracing::info!(
        user_id = %user_id,
        files = documents.len(),
        total_bytes = trace.total_bytes,
        checklist_items = analysis.checklist.len(),
        needs_attention = analysis.attention_items().count(),
        "analysis complete"
    );

    let file_names = documents
        .iter()
        .map(|d| d.display_name().to_string())
        .collect();
    spawn_history_write(state, user_id, file_names, analysis.clone());
    Ok(analysis)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    match state.auth.resolve(headers).await {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => {
            inc(&state.metrics.auth_failures_total);
            Err(ApiError::Unauthorized)
        }
        Err(err) => {
            inc(&state.metrics.auth_failures_total);
            tracing::warn!(authenticator = state.auth.name(), error = %err, "identity lookup failed");
            Err(ApiError::from(err))
        }
    }
}

fn outcome_of(err: &ApiError) -> AnalyzeOutcome {
    match err {
        ApiError::Unauthorized => AnalyzeOutcome::Unauthenticated,
        ApiError::AuthUnavailable(_) => AnalyzeOutcome::AuthUnavailable,
        ApiError::Validation(_) | ApiError::BodyTooLarge { .. } => AnalyzeOutcome::Rejected,
        ApiError::Provider(_) | ApiError::Persistence(_) => AnalyzeOutcome::ProviderFailed,
    }
}

/// Record the analysis without holding up the response.  A failed write
/// is logged and counted; the caller already has their result.
fn spawn_history_write(
    state: &AppState,
    user_id: String,
    file_names: Vec<String>,
    analysis: AnalysisResult,
) {
    let store = state.history.clone();
    let events = state.events.clone();
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        match store.save(&user_id, &file_names, &analysis).await {
            Ok(id) => tracing::debug!(user_id = %user_id, id = %id, store = store.kind(), "analysis saved"),
            Err(err) => {
                inc(&metrics.history_write_failures_total);
                tracing::warn!(user_id = %user_id, store = store.kind(), error = %err, "failed to save analysis history");
                events.persistence_failure(&user_id, &err.to_string());
            }
        }
    });
}

fn json_rejection_error(state: &AppState, rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!(limit = state.max_request_bytes, "request body exceeded configured limit");
            ApiError::BodyTooLarge {
                limit: state.max_request_bytes,
            }
        }
        other => ApiError::from(ValidationError::Malformed(other.body_text())),
    }
}

async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Response {
    inc(&state.metrics.history_requests_total);

    let user_id = match state.auth.resolve(&headers).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            inc(&state.metrics.auth_failures_total);
            return ApiError::Unauthorized.into_response();
        }
        Err(err) => {
            // Outage degrades to an empty list rather than an error page.
            inc(&state.metrics.auth_failures_total);
            tracing::warn!(authenticator = state.auth.name(), error = %err, "identity lookup failed; serving empty history");
            return (StatusCode::OK, Json(HistoryResponse { history: Vec::new() })).into_response();
        }
    };

    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return ApiError::from(ValidationError::Malformed(rejection.body_text())).into_response()
        }
    };
    let limit = match query.limit.as_deref().map(parse_limit) {
        None => None,
        Some(Some(limit)) => Some(limit),
        Some(None) => {
            return ApiError::from(ValidationError::Malformed(
                "limit must be an integer".to_string(),
            ))
            .into_response()
        }
    };

    match state.history.list_for_user(&user_id, limit).await {
        Ok(history) => (StatusCode::OK, Json(HistoryResponse { history })).into_response(),
        Err(err) => {
            inc(&state.metrics.history_read_failures_total);
            ApiError::from(err).into_response()
        }
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.provider.name(),
        "auth": state.auth.name(),
        "historyStore": state.history.kind(),
        "maxFiles": state.limits.max_files,
        "maxRequestBytes": state.max_request_bytes,
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render(
        state.events.lines_total(),
        state.events.write_errors_total(),
        state.events.file_size_bytes(),
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
