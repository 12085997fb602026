//! # AI Service Client
//!
//! HTTP client for the speech/language service that plays every
//! collaborator role. One `reqwest::Client` is shared by all calls.
//!
//! ## Endpoints
//! - `POST /transcribe` (multipart `audio`) → `{"transcript": "..."}`
//! - `POST /generate-examiner-response` → `{"response": "..."}`
//! - `GET /generate-part{1,2,3}` → `{"questions": [...]}` or `{"question": "..."}`
//! - `POST /synthesize-speech` → raw audio bytes
//! - `POST /quick-evaluate` → `{feedback, score, strengths, suggestions}`
//! - `POST /evaluate` (multipart) → `{"transcript", "evaluation": {...}}`
//! - `POST /evaluate` (JSON) → `{"evaluation": {...}}`
//!
//! The service reports failures in-band as `{"error": "..."}`; those become
//! [`CollaboratorError::Rejected`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::{CollaboratorError, Evaluator, Responder, Result, Synthesizer, Transcriber};
use crate::exam::conversation::{QaPair, Speaker, Turn};
use crate::exam::phase::ExamPhase;
use crate::exam::scoring::{BatchEvaluation, Evaluation, Feedback};

pub struct AiServiceClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    #[serde(rename = "type")]
    role: Speaker,
    content: &'a str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ExaminerRequest<'a> {
    conversation_history: Vec<HistoryEntry<'a>>,
    current_part: u8,
    question_count: usize,
    system_prompt: &'static str,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    questions: Vec<&'a str>,
    answers: Vec<&'a str>,
}

impl AiServiceClient {
    /// Create a client for the service at `base_url`.
    ///
    /// `timeout` is the transport-level limit; callers apply their own
    /// per-call limit on top.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout
            } else if e.is_connect() {
                CollaboratorError::Unavailable(format!(
                    "Cannot connect to AI service at {}",
                    self.base_url
                ))
            } else {
                CollaboratorError::Network(e.to_string())
            }
        })?;

        tracing::debug!(
            "AI service {} answered {} in {:.2}s",
            path,
            response.status(),
            start.elapsed().as_secs_f64()
        );

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status { status, body });
        }

        Ok(response)
    }

    async fn send_json(&self, path: &str, request: RequestBuilder) -> Result<Value> {
        let value: Value = self
            .send(path, request)
            .await?
            .json()
            .await
            .map_err(|e| CollaboratorError::Parse(format!("Invalid JSON from {}: {}", path, e)))?;

        match value.get("error").and_then(Value::as_str) {
            Some(reason) => Err(CollaboratorError::Rejected(reason.to_string())),
            None => Ok(value),
        }
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// The question from a `/generate-partN` response.
fn extract_question(value: &Value) -> Option<String> {
    value
        .get("questions")
        .and_then(Value::as_array)
        .and_then(|questions| questions.iter().find_map(Value::as_str))
        .map(str::to_string)
        .or_else(|| string_field(value, &["question"]))
        .filter(|question| !question.trim().is_empty())
}

fn rejected_if_failed(evaluation: &Evaluation) -> Result<()> {
    match &evaluation.error {
        Some(reason) => Err(CollaboratorError::Rejected(reason.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl Transcriber for AiServiceClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let part = Part::bytes(audio.to_vec())
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let value = self
            .send_json("/transcribe", self.client.post(self.url("/transcribe")).multipart(form))
            .await?;

        string_field(&value, &["transcript", "transcription", "text"])
            .ok_or_else(|| CollaboratorError::Parse("Transcription response has no transcript".to_string()))
    }
}

#[async_trait]
impl Responder for AiServiceClient {
    async fn respond(&self, history: &[Turn], phase: ExamPhase) -> Result<String> {
        let request = ExaminerRequest {
            conversation_history: history
                .iter()
                .map(|turn| HistoryEntry {
                    role: turn.role,
                    content: &turn.content,
                    timestamp: turn.timestamp.to_rfc3339(),
                })
                .collect(),
            current_part: phase.recorded_part(),
            question_count: history
                .iter()
                .filter(|turn| turn.role == Speaker::Examiner)
                .count(),
            system_prompt: phase.framing(),
        };

        let path = "/generate-examiner-response";
        let value = self
            .send_json(path, self.client.post(self.url(path)).json(&request))
            .await?;

        string_field(&value, &["response"])
            .ok_or_else(|| CollaboratorError::Parse("Examiner response is missing 'response'".to_string()))
    }

    async fn propose_question(&self, phase: ExamPhase) -> Result<String> {
        let part = phase
            .number()
            .ok_or_else(|| CollaboratorError::Rejected("No questions once the test is complete".to_string()))?;

        let path = format!("/generate-part{}", part);
        let value = self.send_json(&path, self.client.get(self.url(&path))).await?;

        extract_question(&value)
            .ok_or_else(|| CollaboratorError::Parse(format!("{} returned no question", path)))
    }
}

#[async_trait]
impl Synthesizer for AiServiceClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let path = "/synthesize-speech";
        let response = self
            .send(
                path,
                self.client
                    .post(self.url(path))
                    .json(&serde_json::json!({ "text": text })),
            )
            .await?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Evaluator for AiServiceClient {
    async fn quick_feedback(&self, question: &str, answer: &str) -> Result<Feedback> {
        let path = "/quick-evaluate";
        let value = self
            .send_json(
                path,
                self.client
                    .post(self.url(path))
                    .json(&serde_json::json!({ "answer": answer, "question": question })),
            )
            .await?;

        serde_json::from_value(value)
            .map_err(|e| CollaboratorError::Parse(format!("Invalid quick feedback: {}", e)))
    }

    async fn evaluate_answer(&self, question: &str, answer: &str) -> Result<Evaluation> {
        let form = Form::new()
            .text("question", question.to_string())
            .text("manual_text", answer.to_string());

        let value = self
            .send_json("/evaluate", self.client.post(self.url("/evaluate")).multipart(form))
            .await?;

        let evaluation = Evaluation::from_value(&value);
        rejected_if_failed(&evaluation)?;
        Ok(evaluation)
    }

    async fn evaluate_batch(&self, pairs: &[QaPair]) -> Result<BatchEvaluation> {
        let request = BatchRequest {
            questions: pairs.iter().map(|pair| pair.question.as_str()).collect(),
            answers: pairs.iter().map(|pair| pair.answer.as_str()).collect(),
        };

        let value = self
            .send_json("/evaluate", self.client.post(self.url("/evaluate")).json(&request))
            .await?;

        let batch = BatchEvaluation::from_value(&value);
        rejected_if_failed(&batch.evaluation)?;
        Ok(batch)
    }
}
