//! # Examination Phases
//!
//! The speaking test runs through three parts of escalating cognitive
//! difficulty and then completes:
//!
//! One → Two → Three → Complete
//!
//! `Complete` is terminal. Advancing from it is not an error; it re-reports
//! completion so a client that double-clicks "next part" still gets a
//! well-formed answer.

use serde::{Deserialize, Serialize};

const PART_ONE_INSTRUCTION: &str = "In Part 1, I'll ask you questions about yourself and familiar topics. \
Please give short, direct answers of about 20-30 seconds each.";

const PART_TWO_INSTRUCTION: &str = "In Part 2, I'll give you a topic card. You'll have 1 minute to prepare notes, \
then speak for 1-2 minutes on the topic. I'll tell you when to start.";

const PART_THREE_INSTRUCTION: &str = "In Part 3, we'll have a discussion about more abstract ideas related to the \
Part 2 topic. Please give longer, more detailed responses.";

pub const COMPLETION_MESSAGE: &str =
    "Thank you, that is the end of the speaking test. Your results are being prepared.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamPhase {
    One,
    Two,
    Three,
    Complete,
}

impl ExamPhase {
    /// Part number for the three examination parts, `None` once complete.
    pub fn number(self) -> Option<u8> {
        match self {
            ExamPhase::One => Some(1),
            ExamPhase::Two => Some(2),
            ExamPhase::Three => Some(3),
            ExamPhase::Complete => None,
        }
    }

    /// Part number used when recording turns; answers given after completion
    /// are attributed to the last part.
    pub fn recorded_part(self) -> u8 {
        self.number().unwrap_or(3)
    }

    pub fn from_number(part: u8) -> Option<Self> {
        match part {
            1 => Some(ExamPhase::One),
            2 => Some(ExamPhase::Two),
            3 => Some(ExamPhase::Three),
            _ => None,
        }
    }

    pub fn instruction(self) -> Option<&'static str> {
        match self {
            ExamPhase::One => Some(PART_ONE_INSTRUCTION),
            ExamPhase::Two => Some(PART_TWO_INSTRUCTION),
            ExamPhase::Three => Some(PART_THREE_INSTRUCTION),
            ExamPhase::Complete => None,
        }
    }

    /// System framing handed to the Responder alongside the history window.
    pub fn framing(self) -> &'static str {
        match self {
            ExamPhase::One => {
                "You are an IELTS speaking examiner running Part 1. Ask one short question at a time \
                 about the candidate's life, work, studies or familiar topics."
            }
            ExamPhase::Two => {
                "You are an IELTS speaking examiner running Part 2. Give the candidate a cue card \
                 topic with prompts and let them speak at length; ask at most one rounding-off question."
            }
            ExamPhase::Three => {
                "You are an IELTS speaking examiner running Part 3. Ask abstract discussion questions \
                 linked to the Part 2 topic and probe the candidate's reasoning."
            }
            ExamPhase::Complete => {
                "The IELTS speaking test has finished. Thank the candidate politely and do not ask \
                 further questions."
            }
        }
    }

    fn next(self) -> Self {
        match self {
            ExamPhase::One => ExamPhase::Two,
            ExamPhase::Two => ExamPhase::Three,
            ExamPhase::Three | ExamPhase::Complete => ExamPhase::Complete,
        }
    }
}

/// Outcome of [`PhaseController::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    /// Moved into a new examination part.
    Entered {
        phase: ExamPhase,
        instruction: &'static str,
    },
    /// The test is (or already was) complete.
    Completed { message: &'static str },
}

#[derive(Debug, Clone)]
pub struct PhaseController {
    phase: ExamPhase,
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseController {
    pub fn new() -> Self {
        Self {
            phase: ExamPhase::One,
        }
    }

    pub fn current(&self) -> ExamPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == ExamPhase::Complete
    }

    pub fn advance(&mut self) -> PhaseTransition {
        self.phase = self.phase.next();
        match self.phase.instruction() {
            Some(instruction) => PhaseTransition::Entered {
                phase: self.phase,
                instruction,
            },
            None => PhaseTransition::Completed {
                message: COMPLETION_MESSAGE,
            },
        }
    }
}
