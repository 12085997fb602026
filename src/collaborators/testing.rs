//! Scripted collaborators for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    CollaboratorError, Collaborators, Evaluator, Responder, Result, ServiceCalls, Synthesizer,
    Transcriber,
};
use crate::exam::conversation::{QaPair, Turn};
use crate::exam::phase::ExamPhase;
use crate::exam::scoring::{BatchEvaluation, Evaluation, Feedback};

struct Script {
    transcripts: VecDeque<String>,
    default_transcript: String,
    reply: String,
    questions: VecDeque<String>,
    default_question: String,
    audio: Vec<u8>,
    feedback: Feedback,
    evaluation: Evaluation,
    batch_evaluations: VecDeque<BatchEvaluation>,
    fail_transcribe: bool,
    fail_respond: bool,
    fail_synthesize: bool,
    fail_evaluate: bool,
    delay: Option<Duration>,
    histories: Vec<(Vec<Turn>, ExamPhase)>,
    feedback_requests: Vec<(String, String)>,
    batch_requests: Vec<Vec<QaPair>>,
    question_requests: usize,
}

/// One fake that plays every collaborator role.
#[derive(Clone)]
pub struct FakeServices {
    script: Arc<Mutex<Script>>,
}

pub fn sample_evaluation(score: f64) -> Evaluation {
    Evaluation {
        overall_band: score,
        fluency: score,
        vocabulary: score,
        grammar: score,
        pronunciation: score,
        strengths: vec!["Good range of vocabulary".to_string()],
        weaknesses: vec!["Some hesitation".to_string()],
        error: None,
    }
}

impl Default for FakeServices {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                transcripts: VecDeque::new(),
                default_transcript: "I live in Tashkent with my family.".to_string(),
                reply: "What do you like most about living there?".to_string(),
                questions: VecDeque::new(),
                default_question: "Do you work or study?".to_string(),
                audio: vec![1, 2, 3],
                feedback: Feedback {
                    feedback: "Nice, detailed answer.".to_string(),
                    score: 7.0,
                    strengths: vec!["Fluent delivery".to_string()],
                    suggestions: vec!["Use more linking words".to_string()],
                },
                evaluation: sample_evaluation(7.0),
                batch_evaluations: VecDeque::new(),
                fail_transcribe: false,
                fail_respond: false,
                fail_synthesize: false,
                fail_evaluate: false,
                delay: None,
                histories: Vec::new(),
                feedback_requests: Vec::new(),
                batch_requests: Vec::new(),
                question_requests: 0,
            })),
        }
    }

    /// Every collaborator call fails.
    pub fn failing() -> Self {
        Self::new().with(|s| {
            s.fail_transcribe = true;
            s.fail_respond = true;
            s.fail_synthesize = true;
            s.fail_evaluate = true;
        })
    }

    fn with(self, change: impl FnOnce(&mut Script)) -> Self {
        change(&mut self.script.lock().unwrap());
        self
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn with_transcript(self, text: &str) -> Self {
        self.with(|s| s.default_transcript = text.to_string())
    }

    pub fn with_transcripts(self, texts: &[&str]) -> Self {
        self.with(|s| s.transcripts = texts.iter().map(|t| t.to_string()).collect())
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.with(|s| s.reply = text.to_string())
    }

    pub fn with_questions(self, questions: &[&str]) -> Self {
        self.with(|s| s.questions = questions.iter().map(|q| q.to_string()).collect())
    }

    pub fn with_default_question(self, question: &str) -> Self {
        self.with(|s| s.default_question = question.to_string())
    }

    pub fn with_batch_evaluations(self, evaluations: Vec<BatchEvaluation>) -> Self {
        self.with(|s| s.batch_evaluations = evaluations.into())
    }

    pub fn with_evaluation(self, evaluation: Evaluation) -> Self {
        self.with(|s| s.evaluation = evaluation)
    }

    pub fn failing_synthesis(self) -> Self {
        self.with(|s| s.fail_synthesize = true)
    }

    pub fn failing_responder(self) -> Self {
        self.with(|s| s.fail_respond = true)
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with(|s| s.delay = Some(delay))
    }

    pub fn collaborators(&self) -> Collaborators {
        let fake = Arc::new(self.clone());
        Collaborators {
            transcriber: fake.clone(),
            responder: fake.clone(),
            synthesizer: fake.clone(),
            evaluator: fake,
        }
    }

    pub fn calls(&self) -> ServiceCalls {
        ServiceCalls::new(self.collaborators(), Duration::from_secs(5))
    }

    pub fn histories(&self) -> Vec<(Vec<Turn>, ExamPhase)> {
        self.script().histories.clone()
    }

    pub fn feedback_requests(&self) -> Vec<(String, String)> {
        self.script().feedback_requests.clone()
    }

    pub fn batch_requests(&self) -> Vec<Vec<QaPair>> {
        self.script().batch_requests.clone()
    }

    pub fn question_requests(&self) -> usize {
        self.script().question_requests
    }

    async fn pause(&self) {
        let delay = self.script().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn unavailable() -> CollaboratorError {
    CollaboratorError::Unavailable("scripted failure".to_string())
}

#[async_trait]
impl Transcriber for FakeServices {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String> {
        self.pause().await;
        let mut script = self.script();
        if script.fail_transcribe {
            return Err(unavailable());
        }
        let transcript = script
            .transcripts
            .pop_front()
            .unwrap_or_else(|| script.default_transcript.clone());
        Ok(transcript)
    }
}

#[async_trait]
impl Responder for FakeServices {
    async fn respond(&self, history: &[Turn], phase: ExamPhase) -> Result<String> {
        self.pause().await;
        let mut script = self.script();
        script.histories.push((history.to_vec(), phase));
        if script.fail_respond {
            return Err(unavailable());
        }
        Ok(script.reply.clone())
    }

    async fn propose_question(&self, _phase: ExamPhase) -> Result<String> {
        self.pause().await;
        let mut script = self.script();
        script.question_requests += 1;
        if script.fail_respond {
            return Err(unavailable());
        }
        let question = script
            .questions
            .pop_front()
            .unwrap_or_else(|| script.default_question.clone());
        Ok(question)
    }
}

#[async_trait]
impl Synthesizer for FakeServices {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        self.pause().await;
        let script = self.script();
        if script.fail_synthesize {
            return Err(unavailable());
        }
        Ok(script.audio.clone())
    }
}

#[async_trait]
impl Evaluator for FakeServices {
    async fn quick_feedback(&self, question: &str, answer: &str) -> Result<Feedback> {
        self.pause().await;
        let mut script = self.script();
        script
            .feedback_requests
            .push((question.to_string(), answer.to_string()));
        if script.fail_evaluate {
            return Err(unavailable());
        }
        Ok(script.feedback.clone())
    }

    async fn evaluate_answer(&self, _question: &str, _answer: &str) -> Result<Evaluation> {
        self.pause().await;
        let script = self.script();
        if script.fail_evaluate {
            return Err(unavailable());
        }
        Ok(script.evaluation.clone())
    }

    async fn evaluate_batch(&self, pairs: &[QaPair]) -> Result<BatchEvaluation> {
        self.pause().await;
        let mut script = self.script();
        script.batch_requests.push(pairs.to_vec());
        if script.fail_evaluate {
            return Err(unavailable());
        }
        let evaluation = script.evaluation.clone();
        Ok(script
            .batch_evaluations
            .pop_front()
            .unwrap_or_else(|| BatchEvaluation {
                evaluation,
                detailed_feedback: "Consistent performance.".to_string(),
                improved_answers: Vec::new(),
            }))
    }
}
