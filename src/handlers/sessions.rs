//! # Session Handlers
//!
//! HTTP management of examination sessions. The exam itself runs over the
//! WebSocket; these endpoints create sessions ahead of a connection, report
//! on them and end them.
//!
//! ## Endpoints:
//! - `POST /api/v1/sessions`: create an unconnected session
//! - `GET /api/v1/sessions`: list live sessions
//! - `GET /api/v1/sessions/{id}`: status of one session
//! - `DELETE /api/v1/sessions/{id}?report=true`: end a session, optionally
//!   with a final scored report

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::exam::conversation::ConversationLog;
use crate::exam::session::SessionId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EndSessionQuery {
    /// Evaluate the conversation before returning it
    #[serde(default)]
    pub report: bool,
}

/// Create a session that a WebSocket client can attach to later with
/// `/ws/exam?session_id=...`.
///
/// ## Response (201):
/// ```json
/// { "session_id": "5b1e...", "created_at": "2025-01-01T12:00:00Z", "active": false }
/// ```
pub async fn create_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let id = state.sessions.create().await?;
    let status = state.sessions.get(id).await?.lock().await.status();

    Ok(HttpResponse::Created().json(json!({
        "session_id": status.session_id,
        "created_at": status.created_at,
        "active": status.active
    })))
}

pub async fn list_sessions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let sessions = state.sessions.list().await;

    Ok(HttpResponse::Ok().json(json!({
        "total": sessions.len(),
        "max_sessions": state.sessions.max_sessions(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id: SessionId = path.into_inner().parse()?;
    let status = state.sessions.get(id).await?.lock().await.status();

    Ok(HttpResponse::Ok().json(status))
}

/// End a session. A connected client has its socket closed.
///
/// With `?report=true` each part's answers are evaluated and aggregated
/// into `final_report`; this waits on the evaluator.
pub async fn end_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<EndSessionQuery>,
) -> AppResult<HttpResponse> {
    let id: SessionId = path.into_inner().parse()?;
    let ended = state.sessions.remove(id).await?;

    let mut body = json!({
        "session_id": ended.session_id,
        "turn_count": ended.turn_count,
        "conversation": ended.conversation
    });

    if query.report {
        let log = ConversationLog::from(ended.conversation);
        let report = state.pipeline.final_report(&log).await?;
        body["final_report"] =
            serde_json::to_value(report).map_err(|e| AppError::Internal(e.to_string()))?;
    }

    Ok(HttpResponse::Ok().json(body))
}
