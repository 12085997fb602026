//! # Exam Session Management
//!
//! Owns the live examination sessions. Each session holds the conversation
//! log, the phase state and (while a client is connected) the outbound sink
//! that is the only path for messages to reach that client.
//!
//! ## Session Lifecycle:
//! 1. **Created**: by a WebSocket connect, or by `POST /api/v1/sessions`
//! 2. **Connected**: an outbound sink is attached (at most one)
//! 3. **Removed**: on disconnect, explicit end, or shutdown. Removing a
//!    session drops its sink, which closes the client's socket.
//!
//! Sessions are addressed by opaque [`SessionId`] handles; nothing outside
//! the registry holds a session except through the shared handle it returns.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::exam::conversation::{ConversationLog, Turn};
use crate::exam::messages::ServerMessage;
use crate::exam::phase::PhaseController;

/// Opaque session handle (a random v4 UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(SessionId)
            .map_err(|_| RegistryError::InvalidId(s.to_string()))
    }
}

/// Sending half of a connection's outbound channel.
pub type OutboundSink = mpsc::UnboundedSender<ServerMessage>;

/// Shared handle to one session.
pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Session '{0}' not found")]
    NotFound(SessionId),
    #[error("Session '{0}' already has a connection attached")]
    AlreadyConnected(SessionId),
    #[error("Maximum concurrent sessions ({0}) reached")]
    CapacityReached(usize),
    #[error("'{0}' is not a valid session id")]
    InvalidId(String),
}

/// State of one examination session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    connection: Option<OutboundSink>,
    connected_at: Option<DateTime<Utc>>,
    pub log: ConversationLog,
    pub phase: PhaseController,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            connection: None,
            connected_at: None,
            log: ConversationLog::new(),
            phase: PhaseController::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn connect(&mut self, sink: OutboundSink) {
        self.connection = Some(sink);
        self.connected_at = Some(Utc::now());
    }

    fn disconnect(&mut self) {
        self.connection = None;
        self.connected_at = None;
    }

    /// Push a message to the attached client.
    ///
    /// Returns `false` when no client is attached or the client has gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        let Some(connection) = &self.connection else {
            tracing::debug!(session_id = %self.id, kind = message.kind(), "No connection, dropping message");
            return false;
        };

        let kind = message.kind();
        match connection.send(message) {
            Ok(()) => {
                tracing::debug!(session_id = %self.id, kind, "Queued outbound message");
                true
            }
            Err(_) => {
                tracing::debug!(session_id = %self.id, kind, "Connection closed, dropping message");
                false
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        let phase = self.phase.current();
        SessionStatus {
            session_id: self.id,
            active: self.is_connected(),
            current_phase: phase.recorded_part(),
            test_complete: self.phase.is_complete(),
            created_at: self.created_at,
            connected_at: self.connected_at,
            turn_count: self.log.len(),
        }
    }
}

/// Point-in-time view of a session for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub active: bool,
    pub current_phase: u8,
    pub test_complete: bool,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub turn_count: usize,
}

/// What is left of a session after removal.
#[derive(Debug, Clone, Serialize)]
pub struct EndedSession {
    pub session_id: SessionId,
    pub conversation: Vec<Turn>,
    pub turn_count: usize,
}

/// Summary of registry state for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub connected_sessions: usize,
    pub max_sessions: usize,
}

/// Live sessions keyed by id.
///
/// ## Features:
/// - Enforces the concurrent session limit
/// - At most one connection per session
/// - Create and remove are atomic with respect to concurrent lookups
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
    max_sessions: AtomicUsize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: AtomicUsize::new(max_sessions),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions.load(Ordering::Relaxed)
    }

    /// Change the session limit. Existing sessions are kept even when the
    /// new limit is below the current count; only creation is refused.
    pub fn set_max_sessions(&self, max_sessions: usize) {
        let previous = self.max_sessions.swap(max_sessions, Ordering::Relaxed);
        if previous != max_sessions {
            tracing::info!(previous, max_sessions, "Session limit changed");
        }
    }

    /// Create a session with no connection attached.
    pub async fn create(&self) -> Result<SessionId, RegistryError> {
        let (id, _) = self.insert(None).await?;
        Ok(id)
    }

    /// Create a session and attach `sink` in one step.
    pub async fn create_connected(
        &self,
        sink: OutboundSink,
    ) -> Result<(SessionId, SharedSession), RegistryError> {
        self.insert(Some(sink)).await
    }

    async fn insert(
        &self,
        sink: Option<OutboundSink>,
    ) -> Result<(SessionId, SharedSession), RegistryError> {
        let mut sessions = self.sessions.write().await;

        let max_sessions = self.max_sessions();
        if sessions.len() >= max_sessions {
            return Err(RegistryError::CapacityReached(max_sessions));
        }

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let mut session = Session::new(id);
        if let Some(sink) = sink {
            session.connect(sink);
        }

        let shared = Arc::new(Mutex::new(session));
        sessions.insert(id, Arc::clone(&shared));

        tracing::info!(session_id = %id, total = sessions.len(), "Session created");
        Ok((id, shared))
    }

    /// Attach a connection to an existing session.
    pub async fn attach(
        &self,
        id: SessionId,
        sink: OutboundSink,
    ) -> Result<SharedSession, RegistryError> {
        let shared = self.get(id).await?;
        {
            let mut session = shared.lock().await;
            if session.is_connected() {
                return Err(RegistryError::AlreadyConnected(id));
            }
            session.connect(sink);
        }

        tracing::info!(session_id = %id, "Connection attached to session");
        Ok(shared)
    }

    /// Release the connection of a session without ending it, so a later
    /// connection can attach again.
    pub async fn detach(&self, id: SessionId) -> Result<(), RegistryError> {
        let shared = self.get(id).await?;
        shared.lock().await.disconnect();

        tracing::info!(session_id = %id, "Connection detached from session");
        Ok(())
    }

    pub async fn get(&self, id: SessionId) -> Result<SharedSession, RegistryError> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    /// Remove a session, releasing its connection.
    pub async fn remove(&self, id: SessionId) -> Result<EndedSession, RegistryError> {
        let shared = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&id).ok_or(RegistryError::NotFound(id))?
        };

        let mut session = shared.lock().await;
        // Dropping the sink ends the outbound stream and closes the socket
        session.disconnect();

        tracing::info!(session_id = %id, turns = session.log.len(), "Session removed");
        Ok(EndedSession {
            session_id: id,
            conversation: session.log.turns().to_vec(),
            turn_count: session.log.len(),
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<SessionStatus> {
        let handles: Vec<SharedSession> = self.sessions.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.lock().await.status());
        }
        statuses.sort_by_key(|status| status.created_at);
        statuses
    }

    pub async fn summary(&self) -> RegistrySummary {
        let statuses = self.list().await;
        RegistrySummary {
            total_sessions: statuses.len(),
            connected_sessions: statuses.iter().filter(|s| s.active).count(),
            max_sessions: self.max_sessions(),
        }
    }
}
