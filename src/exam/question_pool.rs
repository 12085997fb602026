//! # Question Pool
//!
//! Remembers which questions have already been handed out so the examiner
//! does not keep asking the same thing in slightly different words. Questions
//! are compared by fingerprint, not by exact text.
//!
//! The pool is bounded. When an insert pushes it past capacity the whole set
//! is forgotten and only the newest fingerprint is kept. This is a reset, not
//! an LRU.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Leading phrasings that do not change what is being asked.
const QUESTION_PREFIXES: &[&str] = &[
    "i'd like you to",
    "i would like you to",
    "now i'd like you to",
    "can you please",
    "could you please",
    "would you please",
    "can you",
    "could you",
    "would you",
    "will you",
    "please",
    "now",
    "so",
    "okay",
    "ok",
    "and",
];

/// Normalize question text into a comparison fingerprint.
///
/// Lower-cases, collapses whitespace, strips leading question-type prefixes
/// and trailing punctuation.
pub fn normalize(text: &str) -> String {
    let mut fingerprint = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    loop {
        let trimmed = fingerprint.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
        let trimmed = trimmed.trim_start_matches(|c: char| c == ',' || c.is_whitespace());

        let stripped = QUESTION_PREFIXES.iter().find_map(|prefix| {
            trimmed
                .strip_prefix(prefix)
                .filter(|rest| rest.is_empty() || rest.starts_with(' ') || rest.starts_with(','))
        });

        let next = match stripped {
            Some(rest) => rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace()).to_string(),
            None => trimmed.to_string(),
        };

        if next == fingerprint {
            return next;
        }
        fingerprint = next;
    }
}

/// Process-wide set of issued question fingerprints.
#[derive(Debug)]
pub struct QuestionPool {
    fingerprints: Mutex<HashSet<String>>,
    capacity: usize,
}

impl QuestionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            fingerprints: Mutex::new(HashSet::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lock().contains(fingerprint)
    }

    /// Insert `fingerprint` if it is not already present.
    ///
    /// Membership check, insert and the capacity reset all happen under one
    /// lock acquisition. Returns `false` when the fingerprint was already
    /// issued.
    pub fn try_reserve(&self, fingerprint: &str) -> bool {
        let mut fingerprints = self.lock();
        if !fingerprints.insert(fingerprint.to_string()) {
            return false;
        }
        Self::reset_if_over_capacity(&mut fingerprints, self.capacity, fingerprint);
        true
    }

    fn reset_if_over_capacity(fingerprints: &mut HashSet<String>, capacity: usize, newest: &str) {
        if fingerprints.len() > capacity {
            tracing::info!(
                capacity,
                "Question pool exceeded capacity, forgetting issued questions"
            );
            fingerprints.clear();
            fingerprints.insert(newest.to_string());
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked mid-call.
        self.fingerprints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
