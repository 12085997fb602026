//! # Collaborator Services
//!
//! The examination service does not understand speech or language itself.
//! It delegates to four collaborators, each behind a narrow async trait:
//!
//! - [`Transcriber`]: audio bytes → text
//! - [`Responder`]: conversation history + phase → examiner utterance, and
//!   fresh examination questions
//! - [`Synthesizer`]: text → audio bytes
//! - [`Evaluator`]: answers → band scores and feedback
//!
//! Implementations return `Result<_, CollaboratorError>`. The pipeline never
//! calls them directly: [`guarded::ServiceCalls`] adds timeouts and turns
//! every failure into the fallback value the examination protocol expects.

use async_trait::async_trait;
use std::sync::Arc;

use crate::exam::conversation::{QaPair, Turn};
use crate::exam::phase::ExamPhase;
use crate::exam::scoring::{BatchEvaluation, Evaluation, Feedback};

pub mod fallback;
pub mod guarded;
pub mod http;

#[cfg(test)]
pub mod testing;

pub use guarded::ServiceCalls;
pub use http::AiServiceClient;

/// Result type for collaborator calls
pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Errors a collaborator call can fail with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Service reported an error: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout")]
    Timeout,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one chunk of audio. Silence may legitimately yield "".
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce the examiner's next utterance given the recent history.
    async fn respond(&self, history: &[Turn], phase: ExamPhase) -> Result<String>;

    /// Propose a new question for `phase`.
    async fn propose_question(&self, phase: ExamPhase) -> Result<String>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Short feedback on a single answer, sent live after each turn.
    async fn quick_feedback(&self, question: &str, answer: &str) -> Result<Feedback>;

    /// Full band-score evaluation of a single answer.
    async fn evaluate_answer(&self, question: &str, answer: &str) -> Result<Evaluation>;

    /// Evaluation of every question/answer pair of one part.
    async fn evaluate_batch(&self, pairs: &[QaPair]) -> Result<BatchEvaluation>;
}

/// The full set of collaborators the service runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub evaluator: Arc<dyn Evaluator>,
}

impl Collaborators {
    /// Use one AI service client for every role.
    pub fn from_client(client: Arc<AiServiceClient>) -> Self {
        Self {
            transcriber: client.clone(),
            responder: client.clone(),
            synthesizer: client.clone(),
            evaluator: client,
        }
    }
}
