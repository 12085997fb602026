//! # Turn Pipeline
//!
//! Processes one inbound message for one session. For an audio chunk:
//!
//! 1. Transcribe. An empty transcript ends the turn with no output.
//! 2. Record the candidate turn.
//! 3. Ask the Responder for the examiner's reply using the recent history
//!    window and the current phase, and record it.
//! 4. Emit `transcription` then `ai_response`.
//! 5. Synthesize the reply and emit `ai_audio` if any audio came back.
//! 6. If an examiner turn precedes the answer, emit `feedback` on it.
//!
//! The session lock is taken only to touch the log, the phase or the
//! connection. It is never held while a collaborator call is in flight, so
//! HTTP status requests are not blocked by a slow turn.

use futures_util::future::join_all;
use serde::Serialize;

use crate::collaborators::{fallback, ServiceCalls};
use crate::exam::conversation::{ConversationLog, Speaker};
use crate::exam::messages::{InboundMessage, ServerMessage};
use crate::exam::phase::{ExamPhase, PhaseTransition};
use crate::exam::questions::QuestionGenerator;
use crate::exam::scoring::{aggregate, AggregatedResult, BatchEvaluation, ScoringError};
use crate::exam::session::SharedSession;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Turns of history the Responder sees
    pub history_window: usize,
    /// Open each connection with an examiner greeting
    pub send_greeting: bool,
}

/// Final scoring of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    /// Evaluation of Parts 1, 2 and 3, in order
    pub parts: Vec<BatchEvaluation>,
    pub result: AggregatedResult,
}

#[derive(Clone)]
pub struct TurnPipeline {
    services: ServiceCalls,
    questions: QuestionGenerator,
    config: PipelineConfig,
}

impl TurnPipeline {
    pub fn new(services: ServiceCalls, questions: QuestionGenerator, config: PipelineConfig) -> Self {
        Self {
            services,
            questions,
            config,
        }
    }

    pub fn services(&self) -> &ServiceCalls {
        &self.services
    }

    pub fn questions(&self) -> &QuestionGenerator {
        &self.questions
    }

    /// Greet a freshly connected client.
    pub async fn open_session(&self, session: &SharedSession) {
        let greeting = {
            let mut session = session.lock().await;
            let phase = session.phase.current();
            session.send(ServerMessage::SessionStarted {
                session_id: session.id().to_string(),
                part: phase.recorded_part(),
                instruction: phase.instruction().unwrap_or_default().to_string(),
            });

            if !self.config.send_greeting {
                return;
            }

            let greeting = fallback::greeting();
            session.log.push(Speaker::Examiner, greeting, phase.recorded_part());
            session.send(ServerMessage::AiResponse {
                content: greeting.to_string(),
            });
            greeting
        };

        if let Some(audio) = self.services.synthesize(greeting).await {
            session.lock().await.send(ServerMessage::audio(&audio));
        }
    }

    pub async fn handle(&self, session: &SharedSession, message: InboundMessage) {
        match message {
            InboundMessage::AudioChunk { audio } => self.handle_audio(session, audio.decode()).await,
            InboundMessage::AdvancePhase => self.handle_advance(session).await,
            InboundMessage::Heartbeat => {
                session.lock().await.send(ServerMessage::Pong {});
            }
            InboundMessage::Unknown { kind } => {
                let id = session.lock().await.id();
                tracing::warn!(session_id = %id, kind = %kind, "Ignoring unknown message type");
            }
        }
    }

    async fn handle_audio(&self, session: &SharedSession, audio: Vec<u8>) {
        let transcript = self.services.transcribe(&audio).await;
        if transcript.is_empty() {
            tracing::debug!(bytes = audio.len(), "Empty transcription, dropping chunk");
            return;
        }

        let (answer_index, history, phase) = {
            let mut session = session.lock().await;
            let phase = session.phase.current();
            let index = session
                .log
                .push(Speaker::Candidate, transcript.clone(), phase.recorded_part());
            let history = session.log.recent(self.config.history_window).to_vec();
            (index, history, phase)
        };

        let reply = self.services.respond(&history, phase).await;

        let question = {
            let mut session = session.lock().await;
            session
                .log
                .push(Speaker::Examiner, reply.clone(), phase.recorded_part());
            tracing::debug!(session_id = %session.id(), part = phase.recorded_part(), "Recorded exchange");

            session.send(ServerMessage::Transcription {
                content: transcript.clone(),
            });
            session.send(ServerMessage::AiResponse {
                content: reply.clone(),
            });

            session
                .log
                .preceding_examiner(answer_index)
                .map(|turn| turn.content.clone())
        };

        if let Some(audio) = self.services.synthesize(&reply).await {
            session.lock().await.send(ServerMessage::audio(&audio));
        }

        if let Some(question) = question {
            let feedback = self.services.quick_feedback(&question, &transcript).await;
            session.lock().await.send(ServerMessage::Feedback(feedback));
        }
    }

    async fn handle_advance(&self, session: &SharedSession) {
        let transition = session.lock().await.phase.advance();

        match transition {
            PhaseTransition::Entered { phase, instruction } => {
                let generated = self.questions.generate(phase).await;

                let mut session = session.lock().await;
                tracing::info!(session_id = %session.id(), part = generated.part, "Entered new part");
                session
                    .log
                    .push(Speaker::Examiner, generated.question.clone(), generated.part);
                session.send(ServerMessage::PartTransition {
                    part: generated.part,
                    instruction: instruction.to_string(),
                    question: generated.question,
                });
            }
            PhaseTransition::Completed { message } => {
                let session = session.lock().await;
                tracing::info!(session_id = %session.id(), "Test complete");
                session.send(ServerMessage::TestComplete {
                    message: message.to_string(),
                });
            }
        }
    }

    /// Evaluate each part's question/answer pairs and aggregate them.
    ///
    /// A part with no recorded pairs is not sent to the evaluator and counts
    /// as a failed evaluation.
    pub async fn final_report(&self, log: &ConversationLog) -> Result<FinalReport, ScoringError> {
        let evaluations = [ExamPhase::One, ExamPhase::Two, ExamPhase::Three].map(|phase| {
            let part = phase.recorded_part();
            let pairs = log.pairs_for_part(part);
            async move {
                if pairs.is_empty() {
                    BatchEvaluation::failed(format!("No answers recorded for part {}", part))
                } else {
                    self.services.evaluate_batch(&pairs).await
                }
            }
        });

        let parts = join_all(evaluations).await;
        let phase_evaluations: Vec<_> = parts.iter().map(|part| part.evaluation.clone()).collect();
        let result = aggregate(&phase_evaluations)?;

        Ok(FinalReport { parts, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::{sample_evaluation, FakeServices};
    use crate::exam::messages::AudioPayload;
    use crate::exam::question_pool::QuestionPool;
    use crate::exam::session::SessionRegistry;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn pipeline_with(services: ServiceCalls, send_greeting: bool) -> TurnPipeline {
        let questions = QuestionGenerator::new(Arc::new(QuestionPool::new(200)), services.clone(), 5);
        TurnPipeline::new(
            services,
            questions,
            PipelineConfig {
                history_window: 10,
                send_greeting,
            },
        )
    }

    fn pipeline(fakes: &FakeServices, send_greeting: bool) -> TurnPipeline {
        pipeline_with(fakes.calls(), send_greeting)
    }

    async fn connected() -> (SharedSession, mpsc::UnboundedReceiver<ServerMessage>) {
        let registry = SessionRegistry::new(4);
        let (tx, rx) = mpsc::unbounded_channel();
        let (_, session) = registry.create_connected(tx).await.unwrap();
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn kinds(messages: &[ServerMessage]) -> Vec<&'static str> {
        messages.iter().map(ServerMessage::kind).collect()
    }

    fn audio_chunk() -> InboundMessage {
        InboundMessage::AudioChunk {
            audio: AudioPayload::Raw(vec![0, 1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_open_session_greets_candidate() {
        let fakes = FakeServices::new();
        let pipeline = pipeline(&fakes, true);
        let (session, mut rx) = connected().await;

        pipeline.open_session(&session).await;

        let messages = drain(&mut rx);
        assert_eq!(kinds(&messages), vec!["session_started", "ai_response", "ai_audio"]);
        match &messages[0] {
            ServerMessage::SessionStarted { part, instruction, .. } => {
                assert_eq!(*part, 1);
                assert!(instruction.contains("Part 1"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(session.lock().await.log.len(), 1);
    }

    #[tokio::test]
    async fn test_audio_turn_emits_messages_in_order() {
        let fakes = FakeServices::new();
        let pipeline = pipeline(&fakes, true);
        let (session, mut rx) = connected().await;
        pipeline.open_session(&session).await;
        drain(&mut rx);

        pipeline.handle(&session, audio_chunk()).await;

        let messages = drain(&mut rx);
        assert_eq!(
            kinds(&messages),
            vec!["transcription", "ai_response", "ai_audio", "feedback"]
        );
        assert_eq!(
            messages[0],
            ServerMessage::Transcription {
                content: "I live in Tashkent with my family.".to_string()
            }
        );

        // Feedback is on the greeting, which was the last examiner turn
        let greeting = session.lock().await.log.turns()[0].content.clone();
        let requests = fakes.feedback_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, greeting);
        assert_eq!(session.lock().await.log.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_transcription_is_silent() {
        let fakes = FakeServices::new().with_transcript("   ");
        let pipeline = pipeline(&fakes, false);
        let (session, mut rx) = connected().await;

        pipeline.handle(&session, audio_chunk()).await;

        assert!(drain(&mut rx).is_empty());
        assert!(session.lock().await.log.is_empty());
        assert!(fakes.histories().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_audio_is_silent() {
        let fakes = FakeServices::new();
        let pipeline = pipeline(&fakes, false);
        let (session, mut rx) = connected().await;

        let message = InboundMessage::AudioChunk {
            audio: AudioPayload::Encoded("%%%".to_string()),
        };
        pipeline.handle(&session, message).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_first_answer_without_question_gets_no_feedback() {
        let fakes = FakeServices::new();
        let pipeline = pipeline(&fakes, false);
        let (session, mut rx) = connected().await;

        pipeline.handle(&session, audio_chunk()).await;

        assert_eq!(
            kinds(&drain(&mut rx)),
            vec!["transcription", "ai_response", "ai_audio"]
        );
        assert!(fakes.feedback_requests().is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_failure_only_suppresses_audio() {
        let fakes = FakeServices::new().failing_synthesis();
        let pipeline = pipeline(&fakes, true);
        let (session, mut rx) = connected().await;
        pipeline.open_session(&session).await;
        assert_eq!(kinds(&drain(&mut rx)), vec!["session_started", "ai_response"]);

        pipeline.handle(&session, audio_chunk()).await;
        assert_eq!(
            kinds(&drain(&mut rx)),
            vec!["transcription", "ai_response", "feedback"]
        );
    }

    #[tokio::test]
    async fn test_responder_sees_bounded_history_and_phase() {
        let fakes = FakeServices::new();
        let pipeline = pipeline(&fakes, false);
        let (session, mut rx) = connected().await;

        for _ in 0..7 {
            pipeline.handle(&session, audio_chunk()).await;
        }
        drain(&mut rx);

        let histories = fakes.histories();
        assert_eq!(histories.len(), 7);
        assert_eq!(histories[0].0.len(), 1);
        assert_eq!(histories[6].0.len(), 10);
        assert!(histories.iter().all(|(_, phase)| *phase == ExamPhase::One));
        // The window ends with the answer just given
        assert_eq!(histories[6].0[9].role, Speaker::Candidate);
    }

    #[tokio::test]
    async fn test_advance_phase_walks_to_completion() {
        let fakes = FakeServices::new().with_questions(&[
            "Describe a teacher who influenced you.",
            "Should schools teach practical skills?",
        ]);
        let pipeline = pipeline(&fakes, false);
        let (session, mut rx) = connected().await;

        pipeline.handle(&session, InboundMessage::AdvancePhase).await;
        match drain(&mut rx).as_slice() {
            [ServerMessage::PartTransition { part, instruction, question }] => {
                assert_eq!(*part, 2);
                assert!(instruction.contains("Part 2"));
                assert_eq!(question, "Describe a teacher who influenced you.");
            }
            other => panic!("unexpected messages: {:?}", other),
        }
        {
            let session = session.lock().await;
            let opening = &session.log.turns()[0];
            assert_eq!(opening.role, Speaker::Examiner);
            assert_eq!(opening.part, 2);
        }

        pipeline.handle(&session, InboundMessage::AdvancePhase).await;
        assert_eq!(kinds(&drain(&mut rx)), vec!["part_transition"]);

        for _ in 0..2 {
            pipeline.handle(&session, InboundMessage::AdvancePhase).await;
            assert_eq!(kinds(&drain(&mut rx)), vec!["test_complete"]);
        }
        assert!(session.lock().await.phase.is_complete());

        // Answers after completion still get processed
        pipeline.handle(&session, audio_chunk()).await;
        assert_eq!(
            kinds(&drain(&mut rx)),
            vec!["transcription", "ai_response", "ai_audio", "feedback"]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_only_pongs() {
        let fakes = FakeServices::new();
        let pipeline = pipeline(&fakes, false);
        let (session, mut rx) = connected().await;

        pipeline.handle(&session, InboundMessage::Heartbeat).await;
        pipeline
            .handle(&session, InboundMessage::Unknown { kind: "rewind".to_string() })
            .await;

        assert_eq!(drain(&mut rx), vec![ServerMessage::Pong {}]);
        assert!(session.lock().await.log.is_empty());
    }

    #[tokio::test]
    async fn test_transcriber_timeout_drops_turn() {
        let fakes = FakeServices::new().with_delay(Duration::from_millis(200));
        let services = ServiceCalls::new(fakes.collaborators(), Duration::from_millis(20));
        let pipeline = pipeline_with(services, false);
        let (session, mut rx) = connected().await;

        pipeline.handle(&session, audio_chunk()).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_final_report_skips_parts_without_answers() {
        let fakes = FakeServices::new().with_evaluation(sample_evaluation(8.0));
        let pipeline = pipeline(&fakes, false);

        let mut log = ConversationLog::new();
        log.push(Speaker::Examiner, "Do you work or study?", 1);
        log.push(Speaker::Candidate, "I study law.", 1);
        log.push(Speaker::Examiner, "Describe a park you visit.", 2);
        log.push(Speaker::Candidate, "There is a park near my house.", 2);

        let report = pipeline.final_report(&log).await.unwrap();
        assert_eq!(report.parts.len(), 3);
        assert!(report.parts[2].evaluation.is_error());
        assert_eq!(report.result.skipped_phases, vec![3]);
        // 0.25 * 8 + 0.40 * 8
        assert_eq!(report.result.overall_band, 5.2);
        assert_eq!(fakes.batch_requests().len(), 2);
    }
}
