//! # Examination Core
//!
//! Everything that makes up one speaking examination, independent of the
//! transport that carries it:
//!
//! - **conversation**: the ordered log of examiner and candidate turns
//! - **phase**: the Part 1 → Part 2 → Part 3 → complete state machine
//! - **question_pool** / **questions**: issuing questions without repeats
//! - **scoring**: band scores, feedback and the weighted final result
//! - **session**: the registry of live sessions
//! - **messages**: the WebSocket wire protocol
//! - **pipeline**: per-message orchestration of the collaborators

pub mod conversation;
pub mod messages;
pub mod phase;
pub mod pipeline;
pub mod question_pool;
pub mod questions;
pub mod scoring;
pub mod session;
