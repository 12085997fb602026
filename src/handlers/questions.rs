//! # Question Handlers
//!
//! `POST /api/v1/questions` issues a question for one part through the same
//! deduplicating generator the live sessions use, so questions handed out
//! here are not repeated on a socket and vice versa.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::exam::phase::ExamPhase;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub part: u8,
}

/// ## Response:
/// ```json
/// { "question": "Describe a book you enjoyed.", "part": 2, "low_confidence": false, "attempts": 1 }
/// ```
pub async fn generate_question(
    state: web::Data<AppState>,
    body: web::Json<QuestionRequest>,
) -> AppResult<HttpResponse> {
    let phase = ExamPhase::from_number(body.part).ok_or_else(|| {
        AppError::ValidationError(format!("Part must be 1, 2 or 3, got {}", body.part))
    })?;

    let generated = state.pipeline.questions().generate(phase).await;
    Ok(HttpResponse::Ok().json(generated))
}
