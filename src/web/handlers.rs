//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, Subscriber};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_LOG_LIMIT: u32 = 200;
const MAX_LOG_LIMIT: u32 = 2000;

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

fn db_error_response(e: DbError, not_found: &str) -> Response {
    match e {
        DbError::NotFound => error_response(StatusCode::NOT_FOUND, not_found),
        DbError::Invalid(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        other => {
            tracing::error!("API: storage error: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ============================================================================
// Health & overview
// ============================================================================

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "poll_interval_secs": state.config.poll_interval_secs,
    }))
}

pub async fn handle_overview(State(state): State<AppState>) -> Response {
    match state.store.get_overview_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => db_error_response(e, "not found"),
    }
}

// ============================================================================
// API: Endpoints
// ============================================================================

pub async fn handle_list_apis(State(state): State<AppState>) -> Response {
    match state.store.get_endpoints_with_state() {
        Ok(apis) => Json(apis).into_response(),
        Err(e) => db_error_response(e, "not found"),
    }
}

pub async fn handle_get_api(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_endpoint(id) {
        Ok(endpoint) => Json(endpoint).into_response(),
        Err(e) => db_error_response(e, "API not found"),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateApiRequest {
    pub name: String,
    pub url: String,
}

pub async fn handle_create_api(
    State(state): State<AppState>,
    Json(req): Json<CreateApiRequest>,
) -> Response {
    match state.store.add_endpoint(&req.name, &req.url) {
        Ok(endpoint) => {
            tracing::info!("API: registered {} ({})", endpoint.name, endpoint.url);
            (StatusCode::CREATED, Json(endpoint)).into_response()
        }
        Err(e) => db_error_response(e, "API not found"),
    }
}

pub async fn handle_delete_api(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_endpoint(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error_response(e, "API not found"),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
}

fn parse_time_param(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, Response> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid {}: expected RFC 3339", name))),
    }
}

pub async fn handle_get_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Response {
    if let Err(e) = state.store.get_endpoint(id) {
        return db_error_response(e, "API not found");
    }

    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let since = match parse_time_param("since", query.since.as_deref()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let until = match parse_time_param("until", query.until.as_deref()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match state.store.get_logs(id, limit, since, until) {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => db_error_response(e, "API not found"),
    }
}

// ============================================================================
// API: Subscribers
// ============================================================================

pub async fn handle_list_subscribers(State(state): State<AppState>) -> Response {
    match state.store.get_subscribers() {
        Ok(subs) => Json(subs).into_response(),
        Err(e) => db_error_response(e, "not found"),
    }
}

pub async fn handle_create_subscriber(
    State(state): State<AppState>,
    Json(req): Json<Subscriber>,
) -> Response {
    for endpoint_id in &req.follows {
        if let Err(e) = state.store.get_endpoint(*endpoint_id) {
            return match e {
                DbError::NotFound => error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unknown endpoint id: {}", endpoint_id),
                ),
                other => db_error_response(other, "API not found"),
            };
        }
    }

    match state.store.add_subscriber(&req) {
        Ok(stored) => (StatusCode::CREATED, Json(stored)).into_response(),
        Err(e) => db_error_response(e, "subscriber not found"),
    }
}

pub async fn handle_delete_subscriber(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Response {
    match state.store.remove_subscriber(&chat_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error_response(e, "subscriber not found"),
    }
}
