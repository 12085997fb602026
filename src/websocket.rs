//! # Examination WebSocket Handler
//!
//! One connection is one examination session. Clients connect to `/ws/exam`
//! (optionally `?session_id=...` to attach to a session created over HTTP)
//! and then talk JSON.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the server answers with `session_started`, and by
//!    default an examiner greeting (`ai_response` + `ai_audio`)
//! 2. **Answers**: `{"type": "audio_chunk", "audio_data": "<base64>"}` or a
//!    binary frame with the raw bytes
//! 3. **Turn results**: `transcription`, `feedback`, `ai_response`, `ai_audio`
//! 4. **Navigation**: `{"type": "advance_phase"}` moves to the next part;
//!    after Part 3 the server sends `test_complete`
//! 5. **Keep-alive**: `{"type": "heartbeat"}` is answered with `pong`
//!
//! ## Concurrency:
//! The actor never waits on a collaborator. Parsed messages go into a
//! bounded queue drained by one worker task per connection, so turns are
//! processed strictly in arrival order while pings and frames keep flowing.
//! The worker pushes replies into the session's outbound channel, which the
//! actor consumes as a second stream and writes to the socket.

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::PerformanceConfig;
use crate::error::AppError;
use crate::exam::messages::{parse_text, AudioPayload, InboundMessage, ServerMessage};
use crate::exam::pipeline::TurnPipeline;
use crate::exam::session::{RegistryError, SessionId, SessionRegistry, SharedSession};
use crate::state::AppState;

/// Per-connection actor.
///
/// ## Fields:
/// - `inbound`: queue feeding the worker task
/// - `worker`: the task running turns for this session
/// - `outbound`: receiving end of the session's sink, taken in `started`
pub struct ExamWebSocket {
    session_id: SessionId,
    session: SharedSession,
    state: web::Data<AppState>,
    inbound: mpsc::Sender<InboundMessage>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    outbound: Option<mpsc::UnboundedReceiver<ServerMessage>>,
    worker: Option<JoinHandle<()>>,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl ExamWebSocket {
    pub fn new(
        session_id: SessionId,
        session: SharedSession,
        state: web::Data<AppState>,
        outbound: mpsc::UnboundedReceiver<ServerMessage>,
        performance: &PerformanceConfig,
    ) -> Self {
        let (inbound, inbound_rx) = mpsc::channel(performance.inbound_queue_size.max(1));

        Self {
            session_id,
            session,
            state,
            inbound,
            inbound_rx: Some(inbound_rx),
            outbound: Some(outbound),
            worker: None,
            last_heartbeat: Instant::now(),
            heartbeat_interval: Duration::from_secs(performance.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(performance.client_timeout_secs),
        }
    }

    fn send_message(message: &ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize {} message: {}", message.kind(), e),
        }
    }

    /// Hand a message to the worker without blocking the actor.
    fn enqueue(&mut self, message: InboundMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match queue_inbound(&self.inbound, message) {
            Queued::Accepted => {}
            Queued::Busy(reply) => {
                warn!(session_id = %self.session_id, "Inbound queue full, frame rejected");
                Self::send_message(&reply, ctx);
            }
            Queued::WorkerGone => {
                error!(session_id = %self.session_id, "Session worker is gone, closing connection");
                ctx.stop();
            }
        }
    }

    fn start_worker(&mut self) {
        if let Some(inbound_rx) = self.inbound_rx.take() {
            let pipeline = self.state.pipeline.clone();
            self.worker = Some(spawn_worker(pipeline, self.session.clone(), inbound_rx));
        }
    }
}

/// Result of offering one parsed frame to the session worker.
#[derive(Debug, PartialEq)]
enum Queued {
    Accepted,
    /// Queue full; the reply goes back to the client and the frame is dropped
    Busy(ServerMessage),
    WorkerGone,
}

fn queue_inbound(inbound: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> Queued {
    match inbound.try_send(message) {
        Ok(()) => Queued::Accepted,
        Err(TrySendError::Full(_)) => Queued::Busy(ServerMessage::error(
            "busy",
            "Still processing earlier messages, please wait",
        )),
        Err(TrySendError::Closed(_)) => Queued::WorkerGone,
    }
}

/// The only driver of a session's turns: greets the client, then runs one
/// inbound message at a time until the queue closes or the task is aborted.
fn spawn_worker(
    pipeline: TurnPipeline,
    session: SharedSession,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    actix_web::rt::spawn(async move {
        pipeline.open_session(&session).await;
        while let Some(message) = inbound_rx.recv().await {
            pipeline.handle(&session, message).await;
        }
    })
}

/// Destroy the session of a closed connection. Returns `false` when it was
/// already gone, which is the normal case after an HTTP end.
async fn release_session(sessions: &SessionRegistry, session_id: SessionId) -> bool {
    match sessions.remove(session_id).await {
        Ok(ended) => {
            debug!(session_id = %session_id, turns = ended.turn_count, "Session destroyed on disconnect");
            true
        }
        Err(RegistryError::NotFound(_)) => false,
        Err(e) => {
            warn!(session_id = %session_id, "Failed to release session: {}", e);
            false
        }
    }
}

impl Actor for ExamWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket connection started");

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }
        self.start_worker();

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.state.connection_closed();

        let sessions = self.state.sessions.clone();
        let session_id = self.session_id;
        actix_web::rt::spawn(async move {
            release_session(&sessions, session_id).await;
        });

        info!(session_id = %self.session_id, "WebSocket connection stopped");
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ExamWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match parse_text(&text) {
                    Ok(message) => self.enqueue(message, ctx),
                    Err(e) => {
                        warn!(session_id = %self.session_id, "Rejected client message: {}", e);
                        Self::send_message(&ServerMessage::from(&e), ctx);
                    }
                }
            }
            Ok(ws::Message::Binary(bytes)) => {
                self.last_heartbeat = Instant::now();
                let audio = AudioPayload::Raw(bytes.to_vec());
                self.enqueue(InboundMessage::AudioChunk { audio }, ctx);
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "Client closed connection: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(session_id = %self.session_id, "WebSocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Replies produced by the worker.
impl StreamHandler<ServerMessage> for ExamWebSocket {
    fn handle(&mut self, message: ServerMessage, ctx: &mut Self::Context) {
        Self::send_message(&message, ctx);
    }

    /// The sink was dropped: the session was ended elsewhere.
    fn finished(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Session ended, closing connection");
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: Some("session ended".to_string()),
        }));
        ctx.stop();
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub session_id: Option<String>,
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// The session is registered before the upgrade so that a full registry, an
/// unknown id or an id that already has a connection is refused with a
/// plain HTTP error (503, 404, 409) instead of an accepted socket.
pub async fn exam_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<ConnectQuery>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    let (sink, outbound) = mpsc::unbounded_channel();
    let (session_id, session, created) = match &query.session_id {
        Some(raw) => {
            let id: SessionId = raw.parse().map_err(AppError::from)?;
            let session = state.sessions.attach(id, sink).await.map_err(AppError::from)?;
            (id, session, false)
        }
        None => {
            let (id, session) = state
                .sessions
                .create_connected(sink)
                .await
                .map_err(AppError::from)?;
            (id, session, true)
        }
    };

    let config = state.get_config();
    let actor = ExamWebSocket::new(
        session_id,
        session,
        state.clone(),
        outbound,
        &config.performance,
    );

    match ws::start(actor, &req, stream) {
        Ok(response) => {
            state.connection_opened();
            Ok(response)
        }
        Err(e) => {
            warn!(session_id = %session_id, "WebSocket upgrade failed: {}", e);
            // Only a session made for this request goes away; one created
            // over HTTP keeps its log and can be attached again
            let released = if created {
                state.sessions.remove(session_id).await.map(|_| ())
            } else {
                state.sessions.detach(session_id).await
            };
            if let Err(release_error) = released {
                warn!(session_id = %session_id, "Failed to release session after upgrade failure: {}", release_error);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::FakeServices;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    fn state_with(max_sessions: usize) -> web::Data<AppState> {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = max_sessions;
        web::Data::new(AppState::new(config, FakeServices::new().collaborators()))
    }

    #[actix_web::test]
    async fn test_unknown_session_is_refused_before_upgrade() {
        let state = state_with(10);
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws/exam", web::get().to(exam_websocket)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ws/exam?session_id=7f8d2c56-62a4-4a5e-9c2b-3d8c0a1e9b10")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/ws/exam?session_id=abc").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(state.sessions.is_empty().await);
    }

    #[actix_web::test]
    async fn test_full_registry_is_refused() {
        let state = state_with(1);
        state.sessions.create().await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws/exam", web::get().to(exam_websocket)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws/exam").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[actix_web::test]
    async fn test_failed_upgrade_keeps_session_created_over_http() {
        let state = state_with(10);
        let id = state.sessions.create().await.unwrap();
        state
            .sessions
            .get(id)
            .await
            .unwrap()
            .lock()
            .await
            .log
            .push(crate::exam::conversation::Speaker::Examiner, "Where do you live?", 1);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws/exam", web::get().to(exam_websocket)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/ws/exam?session_id={}", id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let status = state.sessions.get(id).await.unwrap().lock().await.status();
        assert!(!status.active);
        assert_eq!(status.turn_count, 1);

        // Detached, so a second attempt is not refused as already connected
        let req = test::TestRequest::get()
            .uri(&format!("/ws/exam?session_id={}", id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(state.sessions.get(id).await.is_ok());
    }

    #[::core::prelude::v1::test]
    fn test_full_queue_rejects_frame_as_busy() {
        let (inbound, inbound_rx) = mpsc::channel(1);

        assert_eq!(queue_inbound(&inbound, InboundMessage::Heartbeat), Queued::Accepted);
        match queue_inbound(&inbound, InboundMessage::AdvancePhase) {
            Queued::Busy(ServerMessage::Error { code, .. }) => assert_eq!(code, "busy"),
            other => panic!("expected busy reply, got {:?}", other),
        }

        drop(inbound_rx);
        assert_eq!(queue_inbound(&inbound, InboundMessage::Heartbeat), Queued::WorkerGone);
    }

    fn quiet_state() -> web::Data<AppState> {
        let mut config = AppConfig::default();
        config.exam.send_greeting = false;
        web::Data::new(AppState::new(config, FakeServices::new().collaborators()))
    }

    #[actix_web::test]
    async fn test_worker_runs_messages_in_order_until_aborted() {
        let state = quiet_state();
        let (sink, mut outbound) = mpsc::unbounded_channel();
        let (_, session) = state.sessions.create_connected(sink).await.unwrap();
        let (inbound, inbound_rx) = mpsc::channel(4);

        let worker = spawn_worker(state.pipeline.clone(), session, inbound_rx);
        inbound.send(InboundMessage::Heartbeat).await.unwrap();

        assert!(matches!(
            outbound.recv().await,
            Some(ServerMessage::SessionStarted { part: 1, .. })
        ));
        assert_eq!(outbound.recv().await, Some(ServerMessage::Pong {}));

        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());
        assert_eq!(queue_inbound(&inbound, InboundMessage::Heartbeat), Queued::WorkerGone);
    }

    #[actix_web::test]
    async fn test_release_on_disconnect_destroys_session_once() {
        let state = quiet_state();
        let (sink, mut outbound) = mpsc::unbounded_channel();
        let (id, _) = state.sessions.create_connected(sink).await.unwrap();

        assert!(release_session(&state.sessions, id).await);
        assert!(state.sessions.is_empty().await);
        assert_eq!(outbound.recv().await, None);

        assert!(!release_session(&state.sessions, id).await);
    }

    #[actix_web::test]
    async fn test_failed_upgrade_releases_session() {
        let state = state_with(10);
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws/exam", web::get().to(exam_websocket)),
        )
        .await;

        // No upgrade headers, so the handshake fails after registration
        let req = test::TestRequest::get().uri("/ws/exam").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(state.sessions.is_empty().await);
        assert_eq!(state.get_metrics_snapshot().active_connections, 0);
    }
}
