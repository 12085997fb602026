//! # Scoring
//!
//! Band-score types for live feedback and final results, parsing of model
//! output into those types, and the weighted aggregation of the three
//! per-part evaluations into one result.
//!
//! ## Weighting
//! Part 1 counts 25%, Part 2 40% and Part 3 35%. A part whose evaluation
//! failed contributes nothing and its weight is not redistributed; the part
//! number is listed in `skipped_phases` instead.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Weight of Parts 1, 2 and 3 in the aggregated result.
pub const PHASE_WEIGHTS: [f64; 3] = [0.25, 0.40, 0.35];

const SCORE_FIELDS: [&str; 5] = [
    "overall_band",
    "fluency",
    "vocabulary",
    "grammar",
    "pronunciation",
];

const FALLBACK_FEEDBACK: &str = "Keep going! You're doing well.";
const FALLBACK_DETAILED_FEEDBACK: &str =
    "Thank you for completing the IELTS speaking practice session!";

#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    #[error("Expected exactly 3 phase evaluations, got {0}")]
    WrongPhaseCount(usize),
}

/// Clamp to the band range and snap to the nearest half band.
pub fn snap_band(score: f64) -> f64 {
    (score.clamp(0.0, 9.0) * 2.0).round() / 2.0
}

/// Round half away from zero to one decimal place.
///
/// The epsilon keeps values such as 6.85, which are stored as 6.8499999...,
/// rounding up.
pub fn round_one_decimal(value: f64) -> f64 {
    let scaled = value * 10.0;
    (scaled + 1e-9_f64.copysign(scaled)).round() / 10.0
}

/// Models return band scores as numbers or as strings like `"6.5"`.
fn band_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawBand {
        Number(f64),
        Text(String),
    }

    let score = match RawBand::deserialize(deserializer)? {
        RawBand::Number(n) => n,
        RawBand::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid band score '{}'", s)))?,
    };

    if !score.is_finite() {
        return Err(serde::de::Error::custom("band score must be finite"));
    }
    Ok(snap_band(score))
}

/// Per-part evaluation on the five IELTS criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, deserialize_with = "band_score")]
    pub overall_band: f64,
    #[serde(default, deserialize_with = "band_score")]
    pub fluency: f64,
    #[serde(default, deserialize_with = "band_score")]
    pub vocabulary: f64,
    #[serde(default, deserialize_with = "band_score")]
    pub grammar: f64,
    #[serde(default, deserialize_with = "band_score")]
    pub pronunciation: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// Present when the evaluator could not score this part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Evaluation {
    /// Error-tagged evaluation with zero scores.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            overall_band: 0.0,
            fluency: 0.0,
            vocabulary: 0.0,
            grammar: 0.0,
            pronunciation: 0.0,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Parse raw model text. Anything that is not a complete evaluation
    /// becomes an error-tagged fallback.
    pub fn from_model_output(raw: &str) -> Self {
        match parse_model_json(raw) {
            Ok(value) => Self::from_value(&value),
            Err(reason) => Self::failed(reason),
        }
    }

    /// Decode an already-parsed JSON value, unwrapping an `evaluation`
    /// envelope when present. All five scores are required.
    pub fn from_value(value: &Value) -> Self {
        let value = value.get("evaluation").unwrap_or(value);

        if let Some(reason) = value.get("error").and_then(Value::as_str) {
            return Self::failed(reason);
        }

        if let Some(missing) = SCORE_FIELDS.iter().find(|field| value.get(**field).is_none()) {
            return Self::failed(format!("evaluation is missing '{}'", missing));
        }

        match serde_json::from_value::<Evaluation>(value.clone()) {
            Ok(evaluation) => evaluation,
            Err(e) => Self::failed(format!("malformed evaluation: {}", e)),
        }
    }

    fn score(&self, field: usize) -> f64 {
        match field {
            0 => self.overall_band,
            1 => self.fluency,
            2 => self.vocabulary,
            3 => self.grammar,
            _ => self.pronunciation,
        }
    }
}

/// Strip an optional markdown code fence and decode the JSON inside.
fn parse_model_json(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(fenced) => {
            let fenced = fenced.strip_suffix("```").unwrap_or(fenced);
            // Drop the language tag line (```json)
            match fenced.split_once('\n') {
                Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest,
                _ => fenced,
            }
        }
        None => trimmed,
    };

    if body.trim().is_empty() {
        return Err("empty evaluation response".to_string());
    }

    serde_json::from_str(body.trim()).map_err(|e| format!("evaluation is not valid JSON: {}", e))
}

/// Live feedback on a single answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback: String,
    #[serde(deserialize_with = "band_score")]
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Feedback {
    /// Encouraging default used whenever the evaluator is unavailable.
    pub fn fallback() -> Self {
        Self {
            feedback: FALLBACK_FEEDBACK.to_string(),
            score: 6.0,
            strengths: vec!["Clear communication".to_string()],
            suggestions: vec!["Try to elaborate more on your points".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovedAnswer {
    pub question: String,
    pub original_answer: String,
    pub improved_answer: String,
}

/// Evaluation of a whole part together with written feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEvaluation {
    #[serde(flatten)]
    pub evaluation: Evaluation,
    pub detailed_feedback: String,
    pub improved_answers: Vec<ImprovedAnswer>,
}

impl BatchEvaluation {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            evaluation: Evaluation::failed(reason),
            detailed_feedback: FALLBACK_DETAILED_FEEDBACK.to_string(),
            improved_answers: Vec::new(),
        }
    }

    pub fn from_model_output(raw: &str) -> Self {
        match parse_model_json(raw) {
            Ok(value) => Self::from_value(&value),
            Err(reason) => Self::failed(reason),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let evaluation = Evaluation::from_value(value);
        if evaluation.is_error() {
            return Self {
                evaluation,
                detailed_feedback: FALLBACK_DETAILED_FEEDBACK.to_string(),
                improved_answers: Vec::new(),
            };
        }

        let body = value.get("evaluation").unwrap_or(value);
        let detailed_feedback = body
            .get("detailed_feedback")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(FALLBACK_DETAILED_FEEDBACK)
            .to_string();

        // Improved answers are optional; a malformed list is dropped rather
        // than failing an otherwise valid evaluation.
        let improved_answers = body
            .get("improved_answers")
            .cloned()
            .and_then(|list| serde_json::from_value(list).ok())
            .unwrap_or_default();

        Self {
            evaluation,
            detailed_feedback,
            improved_answers,
        }
    }
}

/// Final result across all three parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub overall_band: f64,
    pub fluency: f64,
    pub vocabulary: f64,
    pub grammar: f64,
    pub pronunciation: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// Part numbers whose evaluation failed and contributed nothing
    pub skipped_phases: Vec<u8>,
}

/// Combine exactly three per-part evaluations into one weighted result.
pub fn aggregate(evaluations: &[Evaluation]) -> Result<AggregatedResult, ScoringError> {
    if evaluations.len() != PHASE_WEIGHTS.len() {
        return Err(ScoringError::WrongPhaseCount(evaluations.len()));
    }

    let mut totals = [0.0_f64; 5];
    let mut skipped_phases = Vec::new();

    for (index, (evaluation, weight)) in evaluations.iter().zip(PHASE_WEIGHTS).enumerate() {
        if evaluation.is_error() {
            skipped_phases.push(index as u8 + 1);
            continue;
        }
        for (field, total) in totals.iter_mut().enumerate() {
            *total += weight * evaluation.score(field);
        }
    }

    if !skipped_phases.is_empty() {
        tracing::warn!(?skipped_phases, "Aggregating with failed phase evaluations");
    }

    let [overall_band, fluency, vocabulary, grammar, pronunciation] = totals.map(round_one_decimal);

    Ok(AggregatedResult {
        overall_band,
        fluency,
        vocabulary,
        grammar,
        pronunciation,
        strengths: merge_unique(evaluations.iter().map(|e| &e.strengths)),
        weaknesses: merge_unique(evaluations.iter().map(|e| &e.weaknesses)),
        skipped_phases,
    })
}

fn merge_unique<'a>(lists: impl Iterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for item in lists.flatten() {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uniform(score: f64, strengths: &[&str]) -> Evaluation {
        Evaluation {
            overall_band: score,
            fluency: score,
            vocabulary: score,
            grammar: score,
            pronunciation: score,
            strengths: strengths.iter().map(|s| s.to_string()).collect(),
            weaknesses: vec!["Hesitation".to_string()],
            error: None,
        }
    }

    #[test]
    fn test_aggregate_weights_and_rounding() {
        let result = aggregate(&[
            uniform(8.0, &["Range"]),
            uniform(6.0, &["Range", "Coherence"]),
            uniform(7.0, &[]),
        ])
        .unwrap();

        assert_eq!(result.overall_band, 6.9);
        assert_eq!(result.fluency, 6.9);
        assert_eq!(result.vocabulary, 6.9);
        assert_eq!(result.grammar, 6.9);
        assert_eq!(result.pronunciation, 6.9);
        assert_eq!(result.strengths, vec!["Range", "Coherence"]);
        assert_eq!(result.weaknesses, vec!["Hesitation"]);
        assert!(result.skipped_phases.is_empty());
    }

    #[test]
    fn test_aggregate_requires_three_evaluations() {
        assert_eq!(
            aggregate(&[uniform(6.0, &[]), uniform(6.0, &[])]),
            Err(ScoringError::WrongPhaseCount(2))
        );
        assert_eq!(aggregate(&[]), Err(ScoringError::WrongPhaseCount(0)));
    }

    #[test]
    fn test_failed_phase_contributes_nothing() {
        let result = aggregate(&[
            uniform(8.0, &[]),
            Evaluation::failed("evaluator timed out"),
            uniform(6.0, &[]),
        ])
        .unwrap();

        // 0.25 * 8 + 0.35 * 6, no renormalization
        assert_eq!(result.overall_band, 4.1);
        assert_eq!(result.skipped_phases, vec![2]);
    }

    #[test]
    fn test_round_one_decimal() {
        assert_eq!(round_one_decimal(6.85), 6.9);
        assert_eq!(round_one_decimal(6.84), 6.8);
        assert_eq!(round_one_decimal(7.0), 7.0);
        assert_eq!(round_one_decimal(0.0), 0.0);
    }

    #[test]
    fn test_parse_string_scores_and_snap() {
        let raw = r#"{
            "overall_band": "6.5", "fluency": 7, "vocabulary": "6.3",
            "grammar": 12, "pronunciation": "5.0",
            "strengths": ["Good fluency"], "weaknesses": []
        }"#;
        let evaluation = Evaluation::from_model_output(raw);
        assert!(!evaluation.is_error());
        assert_eq!(evaluation.overall_band, 6.5);
        assert_eq!(evaluation.fluency, 7.0);
        assert_eq!(evaluation.vocabulary, 6.5);
        assert_eq!(evaluation.grammar, 9.0);
        assert_eq!(evaluation.strengths, vec!["Good fluency"]);
    }

    #[test]
    fn test_parse_fenced_and_enveloped_output() {
        let raw = "```json\n{\"evaluation\": {\"overall_band\": 7, \"fluency\": 7, \"vocabulary\": 6.5, \"grammar\": 7, \"pronunciation\": 7}}\n```";
        let evaluation = Evaluation::from_model_output(raw);
        assert!(!evaluation.is_error());
        assert_eq!(evaluation.vocabulary, 6.5);
    }

    #[test]
    fn test_parse_failures_become_error_tagged() {
        assert!(Evaluation::from_model_output("Band 7, nice work").is_error());
        assert!(Evaluation::from_model_output("").is_error());

        let missing = Evaluation::from_model_output(r#"{"overall_band": 6}"#);
        assert!(missing.error.unwrap().contains("fluency"));

        let reported = Evaluation::from_value(&json!({"error": "rate limited"}));
        assert_eq!(reported.error.as_deref(), Some("rate limited"));
        assert_eq!(reported.overall_band, 0.0);
    }

    #[test]
    fn test_batch_evaluation_reads_feedback_and_improved_answers() {
        let value = json!({
            "evaluation": {
                "overall_band": 6, "fluency": 6, "vocabulary": 6,
                "grammar": 5.5, "pronunciation": 6,
                "detailed_feedback": "Solid answers overall.",
                "improved_answers": [{
                    "question": "Where do you live?",
                    "original_answer": "Tashkent.",
                    "improved_answer": "I live in Tashkent, the capital of Uzbekistan."
                }]
            }
        });
        let batch = BatchEvaluation::from_value(&value);
        assert!(!batch.evaluation.is_error());
        assert_eq!(batch.detailed_feedback, "Solid answers overall.");
        assert_eq!(batch.improved_answers.len(), 1);

        let serialized = serde_json::to_value(&batch).unwrap();
        assert_eq!(serialized["grammar"], json!(5.5));
        assert!(serialized.get("error").is_none());
    }

    #[test]
    fn test_feedback_fallback() {
        let feedback = Feedback::fallback();
        assert_eq!(feedback.score, 6.0);
        assert_eq!(feedback.feedback, "Keep going! You're doing well.");
    }
}
