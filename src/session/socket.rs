//! # Pipeline WebSocket Session
//!
//! Runs the per-connection state machine for the STT → LLM → TTS backend.
//! Clients connect to the default path and drive the session with JSON
//! control messages; binary frames carry raw PCM microphone audio.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: `{"type":"start-listening"}`, `{"type":"stop-listening"}`,
//!   binary 16-bit PCM frames while listening
//! - **Server → Client**: `transcription`, `response-text`, `emotion`,
//!   `response-audio` (base64), and `error` notifications
//!
//! ## State machine:
//! `Idle → Listening` on start-listening (opens the ingest channel);
//! `Listening → Idle` on stop-listening (closes it, the transcriber sees a
//! clean end-of-stream); any state → Closed on disconnect. Both control
//! messages are idempotent no-ops when the session is already in the target
//! state.
//!
//! ## Turn ordering:
//! Generation and synthesis for utterance N overlap with continued audio
//! ingestion for utterance N+1, but never with each other: finals are queued
//! to a single turn loop per session, so each turn's notifications go out in
//! order (final transcription, response text, emotion, audio) before the next
//! turn's. Interim transcripts bypass the queue — they are display-only.

use crate::capability::{PipelineCapabilities, TranscriptEvent};
use crate::config::AppConfig;
use crate::error::VoiceResult;
use crate::conversation::{ConversationHistory, Message};
use crate::persona;
use crate::session::composer::ResponseComposer;
use crate::session::ingest::{ingest_channel, IngestChannel};
use crate::session::synthesis::SynthesisRelay;
use crate::state::{AppState, SessionKind};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a client may go silent before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Control messages from the client (text frames).
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    StartListening,
    StopListening,
}

/// Notifications to the client (text frames).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    Transcription {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    ResponseText {
        text: String,
        emotion: String,
    },
    Emotion(String),
    ResponseAudio(String),
    Error(String),
}

/// Actor message carrying one notification to be written to the socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Outbound(pub ServerMessage);

/// WebSocket actor for one pipeline session.
///
/// Each connection is an independent actor; per-connection state (history,
/// ingest channel) lives here or in the tasks this actor spawns — there is no
/// process-wide session table.
pub struct PipelineSocket {
    state: AppState,
    capabilities: PipelineCapabilities,

    /// Most-recent-N window handed to the generator each turn
    history_window: usize,

    /// Push side of the audio ingest channel; `Some` exactly while Listening
    ingest: Option<IngestChannel>,

    /// Queue of final utterances consumed by this session's turn loop
    turn_tx: Option<mpsc::UnboundedSender<String>>,

    last_heartbeat: Instant,
}

impl PipelineSocket {
    pub fn new(state: AppState, capabilities: PipelineCapabilities, config: &AppConfig) -> Self {
        Self {
            state,
            capabilities,
            history_window: config.performance.history_window,
            ingest: None,
            turn_tx: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Idle → Listening: open the ingest channel and start the transcription
    /// consumer. A no-op if already Listening.
    fn start_listening(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.ingest.is_some() {
            debug!("start-listening while already listening, ignoring");
            return;
        }

        let Some(turn_tx) = self.turn_tx.clone() else {
            // Turn loop is created in started(); reaching this without one
            // means the actor is already shutting down.
            return;
        };

        let (channel, stream) = ingest_channel();
        self.ingest = Some(channel);

        let speech_to_text = self.capabilities.speech_to_text.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let transcriber =
                tokio::spawn(async move { speech_to_text.transcribe(stream, events_tx).await });

            let mut emit = |msg: ServerMessage| addr.do_send(Outbound(msg));
            route_transcripts(&mut events_rx, &turn_tx, &mut emit).await;

            match transcriber.await {
                Ok(result) => {
                    if let Some(notification) = recognition_outcome(result) {
                        emit(notification);
                    }
                }
                Err(err) => error!("Transcription task panicked: {}", err),
            }
        });

        info!("Session listening");
    }

    /// Listening → Idle: dropping the push side signals end-of-stream to the
    /// transcriber. A no-op if already Idle.
    fn stop_listening(&mut self) {
        if self.ingest.take().is_some() {
            info!("Session stopped listening");
        } else {
            debug!("stop-listening while idle, ignoring");
        }
    }

    fn handle_audio_frame(&mut self, data: web::Bytes) {
        match &self.ingest {
            Some(channel) => {
                if !channel.push(data) {
                    // Transcriber is gone (finished or failed); fall back to
                    // Idle rather than accumulating frames nobody reads.
                    debug!("Ingest consumer gone, dropping channel");
                    self.ingest = None;
                }
            }
            // Audio while Idle is ignored, never an error.
            None => debug!("Binary frame while idle, ignoring"),
        }
    }
}

impl Actor for PipelineSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Pipeline session started");
        self.state.session_started(SessionKind::Pipeline);

        // One turn loop per session: it owns the conversation history and
        // serializes turns so their outputs never interleave.
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        self.turn_tx = Some(turn_tx);

        let composer = ResponseComposer::new(
            self.capabilities.generator.clone(),
            persona::PIPELINE_SYSTEM_PROMPT,
        );
        let relay = SynthesisRelay::new(self.capabilities.synthesizer.clone());
        tokio::spawn(run_turn_loop(
            turn_rx,
            composer,
            relay,
            self.history_window,
            self.state.clone(),
            ctx.address(),
        ));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Client heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Pipeline session stopped");
        // Dropping ingest and turn_tx ends the consumer and turn-loop tasks;
        // results of any still-running generation are discarded silently when
        // their do_send hits this dead address.
        self.ingest = None;
        self.turn_tx = None;
        self.state.session_ended(SessionKind::Pipeline);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PipelineSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::StartListening) => self.start_listening(ctx),
                Ok(ClientMessage::StopListening) => self.stop_listening(),
                Err(err) => {
                    // Malformed control messages are logged and ignored; the
                    // connection survives.
                    warn!("Malformed control message: {}", err);
                }
            },
            Ok(ws::Message::Binary(data)) => self.handle_audio_frame(data),
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Client closed pipeline session: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for PipelineSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        // Serialization of our own enum cannot realistically fail, but a
        // skipped notification must never take the later ones down with it.
        match serde_json::to_string(&msg.0) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize notification: {}", err),
        }
    }
}

/// Routes transcription events for one listening interval.
///
/// Interim transcripts and empty finals go straight to the client for
/// display; only non-empty finals enter the turn queue. An empty final
/// (silence between start and stop) therefore never reaches generation and
/// never appends a user message.
async fn route_transcripts(
    events: &mut mpsc::UnboundedReceiver<TranscriptEvent>,
    turns: &mpsc::UnboundedSender<String>,
    emit: &mut (dyn FnMut(ServerMessage) + Send),
) {
    while let Some(event) = events.recv().await {
        if event.is_final {
            if event.text.trim().is_empty() {
                emit(ServerMessage::Transcription {
                    text: event.text,
                    is_final: true,
                });
            } else if turns.send(event.text).is_err() {
                break; // session closing
            }
        } else {
            emit(ServerMessage::Transcription {
                text: event.text,
                is_final: false,
            });
        }
    }
}

/// Maps a finished transcription stream to the notification it owes the
/// client, if any. Recognition errors are per-utterance: the session keeps
/// accepting audio after reporting one.
fn recognition_outcome(result: VoiceResult<()>) -> Option<ServerMessage> {
    match result {
        Ok(()) => {
            debug!("Transcription stream ended cleanly");
            None
        }
        Err(err) => {
            warn!("Transcription stream failed: {}", err);
            Some(ServerMessage::Error(err.client_message().to_string()))
        }
    }
}

/// Consumes final utterances one at a time. Owns this session's history: the
/// only writer, per the single-owner rule for conversation state.
///
/// Ingestion and transcription of later utterances keep running while a turn
/// is in flight; only composition and synthesis are serialized here, which is
/// what keeps each turn's notifications contiguous on the wire.
async fn run_turn_loop(
    mut turns: mpsc::UnboundedReceiver<String>,
    composer: ResponseComposer,
    relay: SynthesisRelay,
    history_window: usize,
    state: AppState,
    addr: Addr<PipelineSocket>,
) {
    let mut history = ConversationHistory::new();

    while let Some(utterance) = turns.recv().await {
        let mut emit = |msg: ServerMessage| addr.do_send(Outbound(msg));
        let completed = run_turn(
            &mut history,
            &composer,
            &relay,
            history_window,
            &utterance,
            &mut emit,
        )
        .await;

        if completed {
            state.turn_completed();
        } else {
            state.turn_failed();
        }
    }

    debug!("Turn loop ended after {} messages", history.len());
}

/// One conversation turn. Emits this turn's notifications in the fixed order
/// (final transcription, response text, emotion, audio); returns whether the
/// turn completed fully.
async fn run_turn(
    history: &mut ConversationHistory,
    composer: &ResponseComposer,
    relay: &SynthesisRelay,
    history_window: usize,
    utterance: &str,
    emit: &mut (dyn FnMut(ServerMessage) + Send),
) -> bool {
    emit(ServerMessage::Transcription {
        text: utterance.to_string(),
        is_final: true,
    });

    // The user message is recorded before generation, and stays recorded even
    // if the turn fails — the user did say it.
    history.append(Message::user(utterance));

    let reply = match composer.compose(history.recent(history_window), utterance).await {
        Ok(reply) => reply,
        Err(err) => {
            error!("Turn failed during composition: {}", err);
            emit(ServerMessage::Error(err.client_message().to_string()));
            return false;
        }
    };

    emit(ServerMessage::ResponseText {
        text: reply.text.clone(),
        emotion: reply.emotion.to_string(),
    });
    emit(ServerMessage::Emotion(reply.emotion.to_string()));

    history.append(Message::assistant(reply.text.clone(), reply.emotion));

    // Text is already delivered; a synthesis failure only costs the audio.
    match relay.synthesize(&reply.text).await {
        Ok(payload) => {
            emit(ServerMessage::ResponseAudio(payload));
            true
        }
        Err(err) => {
            warn!("Turn completed without audio: {}", err);
            emit(ServerMessage::Error(err.client_message().to_string()));
            false
        }
    }
}

/// HTTP → WebSocket upgrade handler for the pipeline path.
pub async fn pipeline_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    capabilities: web::Data<PipelineCapabilities>,
) -> ActixResult<HttpResponse> {
    info!(
        "New pipeline connection from {:?}",
        req.connection_info().peer_addr()
    );

    let config = state.get_config();
    let socket = PipelineSocket::new(
        state.get_ref().clone(),
        capabilities.get_ref().clone(),
        &config,
    );
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::stub::{StubSynthesizer, StubTextGenerator};
    use crate::capability::TextGenerator;
    use crate::conversation::Role;
    use crate::error::{VoiceError, VoiceResult};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_control_message_wire_format() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"start-listening"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StartListening);
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop-listening"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StopListening);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_notification_wire_format() {
        let json = serde_json::to_value(ServerMessage::Transcription {
            text: "hi".into(),
            is_final: true,
        })
        .unwrap();
        assert_eq!(json["type"], "transcription");
        assert_eq!(json["data"]["isFinal"], true);

        let json = serde_json::to_value(ServerMessage::ResponseText {
            text: "hey".into(),
            emotion: "happy".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "response-text");
        assert_eq!(json["data"]["emotion"], "happy");

        let json = serde_json::to_value(ServerMessage::Emotion("shy".into())).unwrap();
        assert_eq!(json["type"], "emotion");
        assert_eq!(json["data"], "shy");

        let json = serde_json::to_value(ServerMessage::ResponseAudio("QUJD".into())).unwrap();
        assert_eq!(json["type"], "response-audio");
        assert_eq!(json["data"], "QUJD");
    }

    #[test]
    fn test_stop_listening_while_idle_is_a_noop() {
        let config = AppConfig::default();
        let mut socket = PipelineSocket::new(
            AppState::new(config.clone()),
            PipelineCapabilities::from_config(&config).unwrap(),
            &config,
        );

        assert!(socket.ingest.is_none());
        socket.stop_listening();
        assert!(socket.ingest.is_none());
    }

    #[tokio::test]
    async fn test_empty_final_never_reaches_the_turn_queue() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (turn_tx, mut turn_rx) = mpsc::unbounded_channel();

        for event in [
            TranscriptEvent {
                text: "Hel…".into(),
                is_final: false,
            },
            TranscriptEvent {
                text: "".into(),
                is_final: true,
            },
            TranscriptEvent {
                text: "   ".into(),
                is_final: true,
            },
            TranscriptEvent {
                text: "Hello".into(),
                is_final: true,
            },
        ] {
            events_tx.send(event).unwrap();
        }
        drop(events_tx);

        let mut emitted = Vec::new();
        let mut emit = |msg: ServerMessage| emitted.push(msg);
        route_transcripts(&mut events_rx, &turn_tx, &mut emit).await;

        // The interim and the blank finals are surfaced for display only.
        assert_eq!(
            emitted,
            vec![
                ServerMessage::Transcription {
                    text: "Hel…".into(),
                    is_final: false
                },
                ServerMessage::Transcription {
                    text: "".into(),
                    is_final: true
                },
                ServerMessage::Transcription {
                    text: "   ".into(),
                    is_final: true
                },
            ]
        );

        // Exactly one turn was queued: the non-empty final. Nothing else can
        // reach the generator or the history, which only the turn loop feeds.
        assert_eq!(turn_rx.recv().await.unwrap(), "Hello");
        assert!(turn_rx.try_recv().is_err());
    }

    #[test]
    fn test_recognition_failure_becomes_error_notification() {
        let notification =
            recognition_outcome(Err(VoiceError::RecognitionFailed("stream torn".into())));
        assert_eq!(
            notification,
            Some(ServerMessage::Error("Speech recognition error".into()))
        );

        // A clean end-of-stream owes the client nothing.
        assert_eq!(recognition_outcome(Ok(())), None);
    }

    struct CannedGenerator(&'static str);

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _: &str, _: &[Message], _: &str) -> VoiceResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _: &str, _: &[Message], _: &str) -> VoiceResult<String> {
            Err(VoiceError::GenerationFailed("boom".into()))
        }
    }

    struct FailingSynthesizer;

    #[async_trait]
    impl crate::capability::SpeechSynthesizer for FailingSynthesizer {
        async fn synthesize(&self, _: &str) -> VoiceResult<Vec<u8>> {
            Err(VoiceError::SynthesisFailed("no voice".into()))
        }
    }

    async fn collect_turn(
        history: &mut ConversationHistory,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn crate::capability::SpeechSynthesizer>,
        utterance: &str,
    ) -> (bool, Vec<ServerMessage>) {
        let composer = ResponseComposer::new(generator, persona::PIPELINE_SYSTEM_PROMPT);
        let relay = SynthesisRelay::new(synthesizer);
        let mut emitted = Vec::new();
        let mut emit = |msg: ServerMessage| emitted.push(msg);
        let ok = run_turn(history, &composer, &relay, 20, utterance, &mut emit).await;
        (ok, emitted)
    }

    #[tokio::test]
    async fn test_successful_turn_emits_in_fixed_order() {
        let mut history = ConversationHistory::new();
        let (ok, emitted) = collect_turn(
            &mut history,
            Arc::new(CannedGenerator("[emotion: happy] こんにちは！")),
            Arc::new(StubSynthesizer::new(16_000)),
            "こんにちは",
        )
        .await;

        assert!(ok);
        assert_eq!(emitted.len(), 4);
        assert_eq!(
            emitted[0],
            ServerMessage::Transcription {
                text: "こんにちは".into(),
                is_final: true
            }
        );
        assert_eq!(
            emitted[1],
            ServerMessage::ResponseText {
                text: "こんにちは！".into(),
                emotion: "happy".into()
            }
        );
        assert_eq!(emitted[2], ServerMessage::Emotion("happy".into()));
        match &emitted[3] {
            ServerMessage::ResponseAudio(payload) => assert!(!payload.is_empty()),
            other => panic!("expected response-audio, got {:?}", other),
        }

        // Both sides of the exchange are recorded.
        assert_eq!(history.len(), 2);
        assert_eq!(history.recent(2)[0].role, Role::User);
        assert_eq!(history.recent(2)[1].content, "こんにちは！");
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_user_message() {
        let mut history = ConversationHistory::new();
        let (ok, emitted) = collect_turn(
            &mut history,
            Arc::new(FailingGenerator),
            Arc::new(StubSynthesizer::new(16_000)),
            "hello?",
        )
        .await;

        assert!(!ok);
        assert_eq!(emitted.len(), 2);
        assert!(matches!(emitted[1], ServerMessage::Error(_)));
        // The utterance that triggered the failure is still recorded.
        assert_eq!(history.len(), 1);
        assert_eq!(history.recent(1)[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_failed_synthesis_still_delivers_text() {
        let mut history = ConversationHistory::new();
        let (ok, emitted) = collect_turn(
            &mut history,
            Arc::new(StubTextGenerator),
            Arc::new(FailingSynthesizer),
            "hello",
        )
        .await;

        assert!(!ok);
        assert_eq!(emitted.len(), 4);
        assert!(matches!(emitted[1], ServerMessage::ResponseText { .. }));
        assert!(matches!(emitted[2], ServerMessage::Emotion(_)));
        assert!(matches!(emitted[3], ServerMessage::Error(_)));
        // Assistant text made it into history even though audio did not.
        assert_eq!(history.len(), 2);
    }

    /// Records the history window each generation call receives.
    struct WindowRecorder(Mutex<Vec<Vec<String>>>);

    #[async_trait]
    impl TextGenerator for WindowRecorder {
        async fn generate(&self, _: &str, history: &[Message], _: &str) -> VoiceResult<String> {
            self.0
                .lock()
                .unwrap()
                .push(history.iter().map(|m| m.content.clone()).collect());
            Ok("[emotion: neutral] ok".to_string())
        }
    }

    #[tokio::test]
    async fn test_generator_sees_exactly_the_recent_window() {
        let mut history = ConversationHistory::new();
        for i in 0..25 {
            history.append(Message::user(format!("old {}", i)));
        }

        let recorder = Arc::new(WindowRecorder(Mutex::new(Vec::new())));
        let (ok, _) = collect_turn(
            &mut history,
            recorder.clone(),
            Arc::new(StubSynthesizer::new(16_000)),
            "newest",
        )
        .await;
        assert!(ok);

        let windows = recorder.0.lock().unwrap();
        let window = &windows[0];
        // Exactly 20 messages, oldest-first, ending with the new utterance.
        assert_eq!(window.len(), 20);
        assert_eq!(window[0], "old 6");
        assert_eq!(window[19], "newest");
    }
}
