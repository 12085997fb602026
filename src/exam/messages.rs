//! # WebSocket Message Protocol
//!
//! ## Client → Server
//! - JSON text frames tagged by `type`:
//!   - `audio_chunk` with base64 `audio_data` (`chunk` also accepted)
//!   - `advance_phase`
//!   - `heartbeat`
//! - Binary frames: a raw audio chunk
//!
//! Hyphenated spellings (`audio-chunk`, `advance-phase`) are accepted.
//!
//! ## Server → Client
//! JSON text frames tagged by `type`, see [`ServerMessage`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exam::scoring::Feedback;

/// A decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AudioChunk { audio: AudioPayload },
    AdvancePhase,
    Heartbeat,
    /// Well-formed message of a kind the server does not handle
    Unknown { kind: String },
}

/// Audio as it arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPayload {
    /// Base64 text from a JSON frame
    Encoded(String),
    /// Bytes from a binary frame
    Raw(Vec<u8>),
}

impl AudioPayload {
    /// Raw audio bytes. Undecodable base64 yields no audio at all.
    pub fn decode(self) -> Vec<u8> {
        match self {
            AudioPayload::Raw(bytes) => bytes,
            AudioPayload::Encoded(text) => match BASE64.decode(text.trim()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("Discarding audio chunk with invalid base64: {}", e);
                    Vec::new()
                }
            },
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Message '{kind}' is missing required field '{field}'")]
    MissingField { kind: String, field: &'static str },
}

impl ProtocolError {
    /// Short code sent to the client in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "invalid_message",
            ProtocolError::MissingField { .. } => "missing_field",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, alias = "chunk")]
    audio_data: Option<String>,
}

/// Parse a JSON text frame.
pub fn parse_text(text: &str) -> Result<InboundMessage, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match envelope.kind.replace('-', "_").as_str() {
        "audio_chunk" => {
            let audio_data = envelope.audio_data.ok_or_else(|| ProtocolError::MissingField {
                kind: envelope.kind.clone(),
                field: "audio_data",
            })?;
            Ok(InboundMessage::AudioChunk {
                audio: AudioPayload::Encoded(audio_data),
            })
        }
        "advance_phase" => Ok(InboundMessage::AdvancePhase),
        "heartbeat" => Ok(InboundMessage::Heartbeat),
        _ => Ok(InboundMessage::Unknown {
            kind: envelope.kind,
        }),
    }
}

/// Messages sent from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First message on every connection
    #[serde(rename = "session_started")]
    SessionStarted {
        session_id: String,
        part: u8,
        instruction: String,
    },

    /// What the candidate just said
    #[serde(rename = "transcription")]
    Transcription { content: String },

    /// What the examiner says next
    #[serde(rename = "ai_response")]
    AiResponse { content: String },

    /// Spoken examiner reply, base64 encoded
    #[serde(rename = "ai_audio")]
    AiAudio { audio_data: String },

    /// Live feedback on the last answer
    #[serde(rename = "feedback")]
    Feedback(Feedback),

    #[serde(rename = "part_transition")]
    PartTransition {
        part: u8,
        instruction: String,
        question: String,
    },

    #[serde(rename = "test_complete")]
    TestComplete { message: String },

    #[serde(rename = "pong")]
    Pong {},

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn audio(bytes: &[u8]) -> Self {
        ServerMessage::AiAudio {
            audio_data: BASE64.encode(bytes),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Value of the `type` tag, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SessionStarted { .. } => "session_started",
            ServerMessage::Transcription { .. } => "transcription",
            ServerMessage::AiResponse { .. } => "ai_response",
            ServerMessage::AiAudio { .. } => "ai_audio",
            ServerMessage::Feedback(_) => "feedback",
            ServerMessage::PartTransition { .. } => "part_transition",
            ServerMessage::TestComplete { .. } => "test_complete",
            ServerMessage::Pong {} => "pong",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl From<&ProtocolError> for ServerMessage {
    fn from(error: &ProtocolError) -> Self {
        ServerMessage::error(error.code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_audio_chunk() {
        let message = parse_text(r#"{"type": "audio_chunk", "audio_data": "AAEC"}"#).unwrap();
        let InboundMessage::AudioChunk { audio } = message else {
            panic!("expected audio chunk");
        };
        assert_eq!(audio.decode(), vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_accepts_hyphen_and_chunk_aliases() {
        assert_eq!(
            parse_text(r#"{"type": "advance-phase"}"#).unwrap(),
            InboundMessage::AdvancePhase
        );
        assert!(matches!(
            parse_text(r#"{"type": "audio-chunk", "chunk": "AAEC"}"#).unwrap(),
            InboundMessage::AudioChunk { .. }
        ));
        assert_eq!(
            parse_text(r#"{"type": "heartbeat"}"#).unwrap(),
            InboundMessage::Heartbeat
        );
    }

    #[test]
    fn test_parse_errors() {
        let malformed = parse_text("{not json").unwrap_err();
        assert_eq!(malformed.code(), "invalid_message");

        let missing = parse_text(r#"{"type": "audio_chunk"}"#).unwrap_err();
        assert_eq!(missing.code(), "missing_field");

        assert_eq!(
            parse_text(r#"{"type": "rewind"}"#).unwrap(),
            InboundMessage::Unknown {
                kind: "rewind".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_base64_decodes_to_nothing() {
        assert!(AudioPayload::Encoded("@@not base64@@".to_string()).decode().is_empty());
        assert_eq!(AudioPayload::Raw(vec![9, 9]).decode(), vec![9, 9]);
    }

    #[test]
    fn test_server_message_wire_format() {
        let pong = serde_json::to_value(ServerMessage::Pong {}).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let feedback = serde_json::to_value(ServerMessage::Feedback(Feedback::fallback())).unwrap();
        assert_eq!(feedback["type"], "feedback");
        assert_eq!(feedback["score"], json!(6.0));

        let audio = serde_json::to_value(ServerMessage::audio(&[0, 1, 2])).unwrap();
        assert_eq!(audio, json!({"type": "ai_audio", "audio_data": "AAEC"}));
    }
}
