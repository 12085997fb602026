//! # Guarded Collaborator Calls
//!
//! Wraps every collaborator call in a timeout and converts failures into
//! the values the examination protocol falls back to:
//!
//! | Call              | On failure or timeout               |
//! |-------------------|-------------------------------------|
//! | transcribe        | empty transcript (turn is dropped)  |
//! | respond           | canned question for the phase       |
//! | propose_question  | canned question for the phase       |
//! | synthesize        | no audio                            |
//! | quick_feedback    | encouraging default, score 6.0      |
//! | evaluate_answer   | error-tagged evaluation             |
//! | evaluate_batch    | error-tagged evaluation             |

use std::future::Future;
use std::time::Duration;

use super::{fallback, CollaboratorError, Collaborators};
use crate::exam::conversation::{QaPair, Turn};
use crate::exam::phase::ExamPhase;
use crate::exam::scoring::{BatchEvaluation, Evaluation, Feedback};

#[derive(Clone)]
pub struct ServiceCalls {
    collaborators: Collaborators,
    timeout: Duration,
}

impl ServiceCalls {
    pub fn new(collaborators: Collaborators, timeout: Duration) -> Self {
        Self {
            collaborators,
            timeout,
        }
    }

    async fn guarded<T, F>(&self, call: &'static str, future: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let result = match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout),
        };

        if let Err(e) = &result {
            tracing::warn!(call, error = %e, "Collaborator call failed, using fallback");
        }
        result
    }

    /// Transcript of `audio`, trimmed; empty when nothing usable came back.
    pub async fn transcribe(&self, audio: &[u8]) -> String {
        if audio.is_empty() {
            return String::new();
        }
        self.guarded("transcribe", self.collaborators.transcriber.transcribe(audio))
            .await
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }

    pub async fn respond(&self, history: &[Turn], phase: ExamPhase) -> String {
        match self
            .guarded("respond", self.collaborators.responder.respond(history, phase))
            .await
        {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            _ => fallback::reply(phase).to_string(),
        }
    }

    /// A proposed question, or `None` when the Responder could not supply one.
    pub async fn propose_question(&self, phase: ExamPhase) -> Option<String> {
        self.guarded(
            "propose_question",
            self.collaborators.responder.propose_question(phase),
        )
        .await
        .ok()
        .map(|question| question.trim().to_string())
        .filter(|question| !question.is_empty())
    }

    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        self.guarded("synthesize", self.collaborators.synthesizer.synthesize(text))
            .await
            .ok()
            .filter(|audio| !audio.is_empty())
    }

    pub async fn quick_feedback(&self, question: &str, answer: &str) -> Feedback {
        self.guarded(
            "quick_feedback",
            self.collaborators.evaluator.quick_feedback(question, answer),
        )
        .await
        .unwrap_or_else(|_| Feedback::fallback())
    }

    pub async fn evaluate_answer(&self, question: &str, answer: &str) -> Evaluation {
        self.guarded(
            "evaluate_answer",
            self.collaborators.evaluator.evaluate_answer(question, answer),
        )
        .await
        .unwrap_or_else(|e| Evaluation::failed(e.to_string()))
    }

    pub async fn evaluate_batch(&self, pairs: &[QaPair]) -> BatchEvaluation {
        self.guarded(
            "evaluate_batch",
            self.collaborators.evaluator.evaluate_batch(pairs),
        )
        .await
        .unwrap_or_else(|e| BatchEvaluation::failed(e.to_string()))
    }
}
