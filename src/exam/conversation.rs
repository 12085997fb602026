//! # Conversation Log
//!
//! Append-only record of what was said in one examination session. The
//! Responder only ever sees a bounded window of the most recent turns; the
//! final report walks the whole log to pair examiner questions with the
//! candidate answers that followed them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Candidate,
    Examiner,
}

/// A single entry in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Speaker,
    pub content: String,
    /// Examination part (1-3) the session was in when the turn was recorded
    pub part: u8,
    pub timestamp: DateTime<Utc>,
}

/// One examiner question directly followed by a candidate answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Ordered turns for one session.
///
/// Role alternation is expected but never enforced: a client that sends two
/// audio chunks before the examiner reply lands simply produces two
/// consecutive candidate turns.
#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return its index.
    pub fn push(&mut self, role: Speaker, content: impl Into<String>, part: u8) -> usize {
        self.turns.push(Turn {
            role,
            content: content.into(),
            part,
            timestamp: Utc::now(),
        });
        self.turns.len() - 1
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The last `size` turns, oldest first.
    pub fn recent(&self, size: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(size);
        &self.turns[start..]
    }

    /// Most recent examiner turn strictly before `index`, scanning backward.
    pub fn preceding_examiner(&self, index: usize) -> Option<&Turn> {
        let end = index.min(self.turns.len());
        self.turns[..end]
            .iter()
            .rev()
            .find(|turn| turn.role == Speaker::Examiner)
    }

    /// Question/answer pairs recorded during `part`.
    ///
    /// A pair is an examiner turn immediately followed by a candidate turn;
    /// the pair belongs to the part the answer was given in.
    pub fn pairs_for_part(&self, part: u8) -> Vec<QaPair> {
        self.turns
            .windows(2)
            .filter(|pair| {
                pair[0].role == Speaker::Examiner
                    && pair[1].role == Speaker::Candidate
                    && pair[1].part == part
            })
            .map(|pair| QaPair {
                question: pair[0].content.clone(),
                answer: pair[1].content.clone(),
            })
            .collect()
    }
}

impl From<Vec<Turn>> for ConversationLog {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}
