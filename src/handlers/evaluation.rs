//! # Evaluation Handlers
//!
//! Scoring endpoints that work without a live connection.
//!
//! ## Endpoints:
//! - `POST /api/v1/evaluations/batch`: evaluate a list of question/answer pairs
//! - `POST /api/v1/evaluations/aggregate`: combine three part evaluations
//! - `POST /api/v1/evaluations/answer`: evaluate one typed or recorded answer
//! - `POST /api/v1/feedback`: quick feedback on one answer

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::exam::conversation::QaPair;
use crate::exam::scoring::{aggregate, Evaluation};
use crate::state::AppState;

/// Recorded answers larger than this are rejected.
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct BatchEvaluationRequest {
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub evaluations: Vec<Evaluation>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub question: String,
    pub answer: String,
}

/// ## Request:
/// ```json
/// { "questions": ["Where do you live?"], "answers": ["In Tashkent."] }
/// ```
///
/// ## Response:
/// The five band scores, strengths, weaknesses, `detailed_feedback` and
/// `improved_answers`. An evaluator failure still answers 200 with an
/// `error` field set.
pub async fn evaluate_batch(
    state: web::Data<AppState>,
    body: web::Json<BatchEvaluationRequest>,
) -> AppResult<HttpResponse> {
    let BatchEvaluationRequest { questions, answers } = body.into_inner();

    if questions.is_empty() {
        return Err(AppError::ValidationError(
            "At least one question/answer pair is required".to_string(),
        ));
    }
    if questions.len() != answers.len() {
        return Err(AppError::ValidationError(format!(
            "Got {} questions but {} answers",
            questions.len(),
            answers.len()
        )));
    }

    let pairs: Vec<QaPair> = questions
        .into_iter()
        .zip(answers)
        .map(|(question, answer)| QaPair { question, answer })
        .collect();

    let evaluation = state.pipeline.services().evaluate_batch(&pairs).await;
    Ok(HttpResponse::Ok().json(evaluation))
}

/// Weighted aggregation of exactly three part evaluations (Parts 1, 2, 3).
pub async fn aggregate_evaluations(body: web::Json<AggregateRequest>) -> AppResult<HttpResponse> {
    let result = aggregate(&body.evaluations)?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn quick_feedback(
    state: web::Data<AppState>,
    body: web::Json<FeedbackRequest>,
) -> AppResult<HttpResponse> {
    if body.answer.trim().is_empty() {
        return Err(AppError::ValidationError("Answer cannot be empty".to_string()));
    }

    let feedback = state
        .pipeline
        .services()
        .quick_feedback(&body.question, &body.answer)
        .await;
    Ok(HttpResponse::Ok().json(feedback))
}

async fn read_field(field: &mut Field) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
        bytes.extend_from_slice(&chunk);
        if bytes.len() > MAX_AUDIO_BYTES {
            return Err(AppError::ValidationError(format!(
                "Upload too large (max: {} bytes)",
                MAX_AUDIO_BYTES
            )));
        }
    }
    Ok(bytes)
}

fn field_text(bytes: Vec<u8>, name: &str) -> AppResult<String> {
    String::from_utf8(bytes)
        .map_err(|_| AppError::ValidationError(format!("Field '{}' is not valid UTF-8", name)))
}

/// Evaluate a single answer.
///
/// ## Request:
/// Multipart form with `question` and either `manual_text` (typed answer)
/// or `audio` (recorded answer). A typed answer wins when both are sent.
///
/// ## Response:
/// ```json
/// { "transcript": "I live in Tashkent...", "evaluation": { "overall_band": 6.5, ... } }
/// ```
pub async fn evaluate_answer(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let mut question: Option<String> = None;
    let mut manual_text: Option<String> = None;
    let mut audio: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(str::to_string)
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?;

        let bytes = read_field(&mut field).await?;
        match name.as_str() {
            "question" => question = Some(field_text(bytes, &name)?),
            "manual_text" => manual_text = Some(field_text(bytes, &name)?),
            "audio" => audio = Some(bytes),
            other => tracing::debug!(field = other, "Ignoring unexpected form field"),
        }
    }

    let question = question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::ValidationError("Field 'question' is required".to_string()))?;

    let services = state.pipeline.services();
    let transcript = match manual_text.filter(|text| !text.trim().is_empty()) {
        Some(text) => text.trim().to_string(),
        None => match audio {
            Some(audio) => services.transcribe(&audio).await,
            None => String::new(),
        },
    };

    if transcript.is_empty() {
        return Err(AppError::ValidationError("No transcript to evaluate".to_string()));
    }

    let evaluation = services.evaluate_answer(&question, &transcript).await;

    Ok(HttpResponse::Ok().json(json!({
        "transcript": transcript,
        "evaluation": evaluation
    })))
}
