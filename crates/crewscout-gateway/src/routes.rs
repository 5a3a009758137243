use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crewscout_core::types::SessionId;

use crate::middleware::Authenticated;
use crate::runner;
use crate::shell::{ShellError, ShellState};
use crate::state::AppState;

pub const REPORT_FILENAME: &str = "competitor_analysis.md";

#[derive(Serialize)]
pub struct SessionView {
    session_id: String,
    #[serde(flatten)]
    state: ShellState,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_secs: Option<u64>,
}

fn view(id: &SessionId, state: ShellState) -> Json<SessionView> {
    let elapsed_secs = state.elapsed_secs(Utc::now());
    Json(SessionView {
        session_id: id.to_string(),
        state,
        elapsed_secs,
    })
}

impl IntoResponse for ShellError {
    fn into_response(self) -> Response {
        let status = match self {
            ShellError::BlankIdea => StatusCode::BAD_REQUEST,
            ShellError::AlreadyRunning | ShellError::NotRunning => StatusCode::CONFLICT,
            ShellError::InvalidTransition { .. } => StatusCode::CONFLICT,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// GET /api/health — no auth required
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct AnalyzeBody {
    pub idea: String,
}

// POST /api/sessions/:id/analyze
pub async fn analyze(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AnalyzeBody>,
) -> Result<impl IntoResponse, ShellError> {
    let session_id = SessionId::from_string(&id);
    let (shell, ticket) = state.sessions.submit(&session_id, &body.idea)?;

    info!(session = %session_id, "Analysis submitted");
    runner::spawn_run(state.clone(), session_id.clone(), body.idea, ticket);

    Ok((StatusCode::ACCEPTED, view(&session_id, shell)))
}

// GET /api/sessions/:id
pub async fn session_state(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<SessionView> {
    let session_id = SessionId::from_string(&id);
    let shell = state.sessions.state(&session_id);
    view(&session_id, shell)
}

// POST /api/sessions/:id/cancel
pub async fn cancel(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ShellError> {
    let session_id = SessionId::from_string(&id);
    let shell = state.sessions.cancel(&session_id)?;
    info!(session = %session_id, "Analysis cancelled");
    Ok(view(&session_id, shell))
}

// GET /api/sessions/:id/report — markdown download, Succeeded only
pub async fn report(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let shell = state.sessions.state(&SessionId::from_string(&id));
    match shell.report() {
        Some(report) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{REPORT_FILENAME}\""),
                ),
            ],
            report.to_string(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
