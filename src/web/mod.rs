//! HTTP surface over the query service.

use crate::core::{MirrorError, Record};
use crate::query::{Health, QueryService, Summary};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryService>,
}

impl AppState {
    pub fn new(query: Arc<QueryService>) -> Self {
        Self { query }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Mirror(MirrorError),
    Input(String),
}

impl From<MirrorError> for WebError {
    fn from(err: MirrorError) -> Self {
        WebError::Mirror(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Input(msg) => (StatusCode::BAD_REQUEST, msg, "input_error"),
            WebError::Mirror(MirrorError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, msg, "input_error")
            }
            WebError::Mirror(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "internal_error",
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

/// Raw `latest-data` query. Numbers are parsed by hand so malformed values
/// produce an [`ErrorResponse`] instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct LatestParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl LatestParams {
    fn limit(&self) -> Result<Option<usize>> {
        parse_count("limit", self.limit.as_deref())
    }

    fn offset(&self) -> Result<usize> {
        Ok(parse_count("offset", self.offset.as_deref())?.unwrap_or(0))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DayParams {
    pub date: Option<String>,
}

/// Builds the API router. When `static_dir` is set, unmatched paths are
/// served from it.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/latest-data", get(latest_data))
        .route("/api/last-record", get(last_record))
        .route("/api/summary", get(summary))
        .route("/api/day", get(day_by_query))
        .route("/api/day/:date", get(day_by_path))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.query.health())
}

async fn latest_data(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Result<Json<Vec<Record>>> {
    let limit = params.limit()?;
    let offset = params.offset()?;
    Ok(Json(state.query.latest(limit, offset).await))
}

async fn last_record(State(state): State<AppState>) -> Json<Option<Record>> {
    Json(state.query.last_record().await)
}

async fn summary(State(state): State<AppState>) -> Json<Summary> {
    Json(state.query.summary().await)
}

async fn day_by_path(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Vec<Record>>> {
    let date = parse_date(&date)?;
    Ok(Json(state.query.day(date).await))
}

async fn day_by_query(
    State(state): State<AppState>,
    Query(params): Query<DayParams>,
) -> Result<Json<Vec<Record>>> {
    let raw = params
        .date
        .ok_or_else(|| WebError::Input("query parameter 'date' is required".to_string()))?;
    let date = parse_date(&raw)?;
    Ok(Json(state.query.day(date).await))
}

fn parse_count(name: &str, raw: Option<&str>) -> Result<Option<usize>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<usize>().map(Some).map_err(|_| {
            WebError::Input(format!("invalid {name} '{raw}', expected a non-negative integer"))
        }),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| WebError::Input(format!("invalid date '{raw}', expected YYYY-MM-DD")))
}
