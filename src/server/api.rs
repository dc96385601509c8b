//! Alert management endpoints, mounted under `/api/alerts`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::core::alerts::notifier::{CHANNEL_DASHBOARD, CHANNEL_EMAIL, CHANNEL_WEBHOOK};
use crate::core::alerts::{
    AlertConfig, AlertStatus, HistoryQuery, RuleDraft, Severity,
};
use crate::error::AlertError;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

/// Error response carrying its HTTP status.
pub struct ApiFailure(StatusCode, String);

impl ApiFailure {
    fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<AlertError> for ApiFailure {
    fn from(err: AlertError) -> Self {
        let status = match &err {
            AlertError::Notification(_) => StatusCode::BAD_GATEWAY,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::NOT_FOUND,
        };
        Self(status, err.to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(ApiError { error: self.1 })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiFailure>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/rules", get(list_rules).post(create_rule))
        .route(
            "/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/{id}/enable", post(enable_rule))
        .route("/rules/{id}/disable", post(disable_rule))
        .route("/presets", get(list_presets))
        .route("/presets/{id}/enable", post(enable_preset))
        .route("/disable-all", post(disable_all))
        .route("/history", get(history))
        .route("/active", get(active))
        .route("/summary", get(summary))
        .route("/test", post(test_channel))
        .route("/metrics", get(metrics))
}

async fn get_config(State(state): State<AppState>) -> Json<AlertConfig> {
    Json(state.alerts.config())
}

async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<AlertConfig>,
) -> ApiResult<AlertConfig> {
    if let Some(channel) = config
        .channels
        .iter()
        .find(|c| ![CHANNEL_WEBHOOK, CHANNEL_DASHBOARD, CHANNEL_EMAIL].contains(&c.kind.as_str()))
    {
        return Err(AlertError::UnknownChannel(channel.kind.clone()).into());
    }
    state.alerts.update_config(config.clone());
    Ok(Json(config))
}

async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.alerts.rules())
}

async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.alerts.rule(&id).map(Json).map_err(ApiFailure::from)
}

async fn create_rule(
    State(state): State<AppState>,
    Json(draft): Json<RuleDraft>,
) -> Result<impl IntoResponse, ApiFailure> {
    let rule = state.alerts.create_rule(draft.into_rule()?)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut draft): Json<RuleDraft>,
) -> Result<impl IntoResponse, ApiFailure> {
    if draft.id.trim().is_empty() {
        draft.id = id.clone();
    }
    let rule = state.alerts.update_rule(&id, draft.into_rule()?)?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiFailure> {
    state.alerts.delete_rule(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.alerts.enable_rule(&id)?))
}

async fn disable_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.alerts.disable_rule(&id)?))
}

async fn list_presets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.alerts.presets())
}

async fn enable_preset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiFailure> {
    let enabled = state.alerts.enable_preset(&id)?;
    Ok(Json(json!({ "preset": id, "enabled_rules": enabled })))
}

async fn disable_all(State(state): State<AppState>) -> Result<StatusCode, ApiFailure> {
    state.alerts.disable_all()?;
    Ok(StatusCode::NO_CONTENT)
}

/// Raw query string form of [`HistoryQuery`].
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub rule_id: Option<String>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn parse_time(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiFailure> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => DateTime::parse_from_rfc3339(v)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| ApiFailure::bad_request(format!("invalid {}: expected RFC3339", field))),
    }
}

impl HistoryParams {
    pub fn into_query(self) -> Result<HistoryQuery, ApiFailure> {
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            None => None,
            Some(s) => Some(AlertStatus::parse(s).ok_or_else(|| ApiFailure::bad_request("invalid status"))?),
        };
        let severity = match self.severity.as_deref().filter(|s| !s.is_empty()) {
            None => None,
            Some(s) => Some(Severity::parse(s).ok_or(AlertError::InvalidSeverity)?),
        };
        Ok(HistoryQuery {
            rule_id: self.rule_id.filter(|id| !id.is_empty()),
            status,
            severity,
            since: parse_time("since", self.since.as_deref())?,
            until: parse_time("until", self.until.as_deref())?,
            limit: self.limit.unwrap_or(0),
            offset: self.offset.unwrap_or(0),
        })
    }
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiFailure> {
    let query = params.into_query()?;
    Ok(Json(state.alerts.history(&query)))
}

async fn active(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.alerts.active_alerts())
}

async fn summary(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.alerts.summary())
}

#[derive(Debug, Deserialize)]
pub struct TestParams {
    pub channel: String,
}

async fn test_channel(
    State(state): State<AppState>,
    Query(params): Query<TestParams>,
) -> Result<impl IntoResponse, ApiFailure> {
    state.alerts.test_notification(&params.channel).await?;
    Ok(Json(json!({ "status": "sent", "channel": params.channel })))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.current_metrics())
}
