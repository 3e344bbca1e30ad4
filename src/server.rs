//! HTTP surface over the security monitor.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::audit::query::parse_range;
use crate::audit::{AuditFilter, ExportFormat};
use crate::config::SecurityConfig;
use crate::error::AuditError;
use crate::monitor::{SecurityEvent, SecurityMonitor};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<SecurityMonitor>,
    pub config: SecurityConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(submit_event))
        .route("/audit/entries", get(list_entries))
        .route("/audit/verify", get(verify_ledger))
        .route("/audit/export", get(export_entries))
        .route("/reports/compliance", get(compliance_report))
        .route("/threats", get(list_threats))
        .route("/admin/unblock", post(unblock))
        .route("/admin/archive", post(archive))
        .route("/admin/retention", post(retention))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
        .with_state(state)
}

fn status_for(err: &AuditError) -> StatusCode {
    match err {
        AuditError::WriteFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuditError::IntegrityViolation { .. } => StatusCode::CONFLICT,
        AuditError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
        AuditError::StorageError(_)
        | AuditError::ConfigError(_)
        | AuditError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: AuditError) -> (StatusCode, Json<Value>) {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "first_bad_sequence": err.first_bad_sequence(),
        })),
    )
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let ledger = state.monitor.ledger();
    Json(json!({
        "status": "healthy",
        "service": "security-audit",
        "timestamp": ledger.now(),
        "entries": ledger.len().await,
        "ledger_trusted": !state.monitor.is_trust_suspended(),
    }))
}

async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<SecurityEvent>,
) -> (StatusCode, Json<Value>) {
    match state.monitor.evaluate(event).await {
        Ok(decision) => (StatusCode::OK, Json(json!(decision))),
        Err(e) => error_response(e),
    }
}

async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let filter = match AuditFilter::from_params(&params) {
        Ok(filter) => filter,
        Err(e) => {
            warn!("Rejected audit query: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"entries": [], "error": e.to_string()})),
            );
        }
    };

    match state.monitor.ledger().query(&filter).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(json!({"count": entries.len(), "entries": entries})),
        ),
        Err(e) => error_response(e),
    }
}

async fn verify_ledger(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let report = state.monitor.verify_ledger().await;
    let status = if report.valid {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(json!(report)))
}

async fn export_entries(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let format = match params.get("format").map(|f| f.parse::<ExportFormat>()).transpose() {
        Ok(format) => format.unwrap_or_default(),
        Err(e) => return error_response(e).into_response(),
    };
    let range = match parse_range(&params) {
        Ok(range) => range,
        Err(e) => return error_response(e).into_response(),
    };

    match state.monitor.ledger().export(range, format).await {
        Ok(body) => {
            info!("Exported {} bytes as {}", body.len(), format);
            ([(header::CONTENT_TYPE, format.content_type())], body).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn compliance_report(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let range = match parse_range(&params) {
        Ok(range) => range,
        Err(e) => return error_response(e),
    };

    match state.monitor.compliance_report(range.start, range.end).await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(e) => error_response(e),
    }
}

async fn list_threats(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let detections = match params.get("source") {
        Some(source) => state.monitor.detections_for(source).await,
        None => state.monitor.detections().await,
    };
    Json(json!({
        "detections": detections,
        "blocked": state.monitor.blocked_keys(),
    }))
}

#[derive(Debug, Deserialize)]
struct UnblockRequest {
    key: String,
}

async fn unblock(
    State(state): State<AppState>,
    Json(request): Json<UnblockRequest>,
) -> (StatusCode, Json<Value>) {
    match state.monitor.unblock(&request.key).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(json!({"key": request.key, "unblocked": removed})),
        ),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ArchiveRequest {
    older_than_days: Option<i64>,
}

async fn archive(
    State(state): State<AppState>,
    Json(request): Json<ArchiveRequest>,
) -> (StatusCode, Json<Value>) {
    let days = request
        .older_than_days
        .unwrap_or(state.config.ledger.retention_days);
    if days < 0 {
        return error_response(AuditError::InvalidFilter(
            "older_than_days must not be negative".to_string(),
        ));
    }

    let Some(older_than) = Duration::try_days(days) else {
        return error_response(AuditError::InvalidFilter(format!(
            "older_than_days of {} is out of range",
            days
        )));
    };

    match state.monitor.archive(older_than).await {
        Ok(summary) => (StatusCode::OK, Json(json!(summary))),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct RetentionRequest {
    retention_days: Option<i64>,
}

async fn retention(
    State(state): State<AppState>,
    Json(request): Json<RetentionRequest>,
) -> (StatusCode, Json<Value>) {
    let days = request
        .retention_days
        .unwrap_or(state.config.ledger.retention_days);

    match state.monitor.clear_old_events(days).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(json!({"removed": removed, "retention_days": days})),
        ),
        Err(e) => error_response(e),
    }
}
