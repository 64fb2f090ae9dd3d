//! HTTP API over the ledger.
//!
//! Never edits master.log, only appends. All state is derived from the
//! event log on each request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::ledger::{Ledger, Reply, Suggestion};
use crate::models::{ApiResponse, EventInput};
use crate::parser::ParsedEvent;
use crate::projections::TimelineWindow;
use crate::query::QueryRequest;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

#[derive(Debug, Deserialize)]
pub struct ParseInput {
    #[serde(alias = "input")]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmInput {
    #[serde(alias = "parsed_event")]
    pub suggestion: ParsedEvent,
    #[serde(alias = "user_response")]
    pub response: String,
}

/// Free text or an already structured request.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum QueryInput {
    Text { query: String },
    Request(QueryRequest),
}

#[derive(Debug, Default, Deserialize)]
pub struct TimelineParams {
    pub from: Option<usize>,
    pub to: Option<usize>,
    pub last: Option<usize>,
}

impl From<TimelineParams> for TimelineWindow {
    fn from(params: TimelineParams) -> Self {
        Self {
            from_index: params.from,
            to_index: params.to,
            last: params.last,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) | Error::NotUnderstood { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Io { .. } | Error::CorruptLog { .. } | Error::Context(_) => {
                error!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ApiResponse::error(self.to_string()))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/parse", post(parse_text))
        .route("/confirm", post(confirm))
        .route("/events", post(create_event).get(list_events))
        .route("/query", post(handle_query))
        .route("/projections/sessions", get(get_sessions))
        .route("/projections/ratios", get(get_ratios))
        .route("/projections/timeline", get(get_timeline))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(ledger: Arc<Ledger>, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let app = router(AppState { ledger });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "server running");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> &'static str {
    concat!("Activity Ledger API v", env!("CARGO_PKG_VERSION"))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Suggest an event for free text. Nothing is written.
async fn parse_text(State(state): State<AppState>, Json(input): Json<ParseInput>) -> Json<Suggestion> {
    Json(state.ledger.suggest(&input.text))
}

/// "yes" appends the suggestion; anything else is treated as a correction.
async fn confirm(
    State(state): State<AppState>,
    Json(input): Json<ConfirmInput>,
) -> Result<Json<Reply>, Error> {
    Ok(Json(state.ledger.respond(&input.suggestion, &input.response)?))
}

/// Append a canonical line (the only write operation allowed).
async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> Result<Json<ApiResponse>, Error> {
    let event = state.ledger.append_line(input.event.trim())?;
    let session = state.ledger.session_after_append(event.index);

    Ok(Json(ApiResponse::success(
        format!("Event logged: {}", event.canonical()),
        json!({
            "event": event,
            "index": event.index,
            "session_info": session,
        }),
    )))
}

async fn list_events(State(state): State<AppState>) -> Result<Json<serde_json::Value>, Error> {
    let events = state.ledger.events()?;
    Ok(Json(json!({
        "count": events.len(),
        "events": events,
    })))
}

async fn handle_query(
    State(state): State<AppState>,
    Json(input): Json<QueryInput>,
) -> Result<Json<ApiResponse>, Error> {
    let result = match input {
        QueryInput::Text { query } => state.ledger.ask(&query)?,
        QueryInput::Request(request) => state.ledger.query(&request)?,
    };
    Ok(Json(ApiResponse::success(result.render(), json!(result))))
}

async fn get_sessions(State(state): State<AppState>) -> Result<Json<serde_json::Value>, Error> {
    let sessions = state.ledger.sessions()?;
    Ok(Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

async fn get_ratios(State(state): State<AppState>) -> Result<Json<serde_json::Value>, Error> {
    let analysis = state.ledger.ratios()?;
    Ok(Json(json!({ "analysis": analysis })))
}

async fn get_timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<serde_json::Value>, Error> {
    let timeline = state.ledger.timeline(&params.into())?;
    Ok(Json(json!({
        "count": timeline.len(),
        "timeline": timeline,
    })))
}
