//! # Question Generation
//!
//! Asks the Responder for questions until one comes back that has not been
//! issued before. After the attempt budget is spent the last candidate is
//! used anyway and marked `low_confidence`.

use serde::Serialize;
use std::sync::Arc;

use crate::collaborators::{fallback, ServiceCalls};
use crate::exam::phase::ExamPhase;
use crate::exam::question_pool::{normalize, QuestionPool};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuestion {
    pub question: String,
    pub part: u8,
    /// True when every attempt collided with an already issued question
    pub low_confidence: bool,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct QuestionGenerator {
    pool: Arc<QuestionPool>,
    services: ServiceCalls,
    max_attempts: u32,
}

impl QuestionGenerator {
    pub fn new(pool: Arc<QuestionPool>, services: ServiceCalls, max_attempts: u32) -> Self {
        Self {
            pool,
            services,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn pool(&self) -> &QuestionPool {
        &self.pool
    }

    pub async fn generate(&self, phase: ExamPhase) -> GeneratedQuestion {
        let part = phase.recorded_part();
        let mut candidate = String::new();

        for attempt in 1..=self.max_attempts {
            candidate = match self.services.propose_question(phase).await {
                Some(question) => question,
                None => fallback::question(phase).to_string(),
            };

            if self.pool.try_reserve(&normalize(&candidate)) {
                tracing::debug!(part, attempt, "Issued new question");
                return GeneratedQuestion {
                    question: candidate,
                    part,
                    low_confidence: false,
                    attempts: attempt,
                };
            }
        }

        tracing::warn!(
            part,
            attempts = self.max_attempts,
            "No unique question found, reusing last candidate"
        );
        GeneratedQuestion {
            question: candidate,
            part,
            low_confidence: true,
            attempts: self.max_attempts,
        }
    }
}
