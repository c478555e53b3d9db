//! # Live-Model Duplex Proxy
//!
//! Bridges a client WebSocket to the upstream bidirectional speech model.
//! The server contributes exactly two things of its own: bearer-token
//! authentication (so credentials never reach the browser) and the one-time
//! setup message after the upstream handshake. Everything else is relayed
//! verbatim in both directions, audio and JSON alike.
//!
//! ## Connection lifecycle:
//! 1. Client connects to `/vertex-live`; the actor starts the upstream task.
//! 2. Token acquisition, bounded by `credential_timeout_ms`. Failure or
//!    timeout closes the client with 1008 and no upstream dial is attempted.
//! 3. Upstream dial + handshake, bounded by `handshake_timeout_ms`. Failure
//!    closes the client with 1011.
//! 4. Setup message goes upstream exactly once, then frames flow freely.
//!    The `setupComplete` ack is noted in the logs on its way through.
//! 5. Either side closing tears down the other, mirroring the close code.
//!
//! ## Backpressure:
//! Client→upstream frames go through a bounded channel. When it fills, the
//! actor stalls its own stream with `ctx.wait` until the writer catches up,
//! which lets WebSocket-level flow control push back on the client.
//! Upstream→client frames are delivered with `addr.send().await`, so a slow
//! client slows the upstream reader instead of growing the mailbox.

use crate::capability::TokenProvider;
use crate::config::UpstreamConfig;
use crate::error::{VoiceError, CLOSE_UPSTREAM_ERROR};
use crate::live;
use crate::state::{AppState, SessionKind};

use actix::fut::wrap_future;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as UpstreamCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames the actor can buffer toward the upstream writer before it starts
/// stalling the client stream.
const UPSTREAM_CHANNEL_CAPACITY: usize = 32;

/// One frame from upstream, to be written to the client socket.
#[derive(Message)]
#[rtype(result = "()")]
enum UpstreamFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Instruction to close the client socket with a specific code.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseClient {
    code: Option<u16>,
    description: Option<String>,
}

impl CloseClient {
    fn from_error(err: &VoiceError) -> Self {
        Self {
            code: err.close_code(),
            description: Some(err.client_message().to_string()),
        }
    }

    fn from_upstream(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self {
                code: Some(u16::from(frame.code)),
                description: Some(frame.reason.into_owned()),
            },
            None => Self {
                code: None,
                description: None,
            },
        }
    }
}

/// WebSocket actor for one proxied live-model session.
pub struct LiveProxySocket {
    state: AppState,
    upstream: UpstreamConfig,
    tokens: Arc<dyn TokenProvider>,

    /// Sender half toward the upstream writer; dropped on stop so the
    /// upstream task sees the session end.
    to_upstream: Option<mpsc::Sender<UpstreamMessage>>,

    /// Guards against closing the client socket twice when both sides tear
    /// down at once.
    closing: bool,

    last_heartbeat: Instant,
}

impl LiveProxySocket {
    pub fn new(state: AppState, upstream: UpstreamConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            state,
            upstream,
            tokens,
            to_upstream: None,
            closing: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Queue one frame toward upstream. On a full channel the actor stalls
    /// its own stream until there is room again.
    fn relay_to_upstream(&mut self, msg: UpstreamMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(tx) = self.to_upstream.clone() else {
            return;
        };

        self.state.frames_relayed(1);
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                debug!("Upstream writer backlogged, stalling client stream");
                ctx.wait(wrap_future(async move {
                    let _ = tx.send(msg).await;
                }));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Upstream task has ended; it closes the client itself.
                debug!("Dropping client frame, upstream writer gone");
            }
        }
    }
}

impl Actor for LiveProxySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Live proxy session started");
        self.state.session_started(SessionKind::Proxy);

        let (tx, rx) = mpsc::channel(UPSTREAM_CHANNEL_CAPACITY);
        self.to_upstream = Some(tx);

        tokio::spawn(run_upstream(
            self.upstream.clone(),
            self.tokens.clone(),
            ctx.address(),
            rx,
            self.state.clone(),
        ));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Client heartbeat timeout, closing proxy session");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Live proxy session stopped");
        // Dropping the sender ends the upstream task's recv loop, which
        // closes the upstream socket.
        self.to_upstream = None;
        self.state.session_ended(SessionKind::Proxy);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveProxySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.relay_to_upstream(UpstreamMessage::Text(text.to_string()), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.relay_to_upstream(UpstreamMessage::Binary(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Client closed proxy session: {:?}", reason);
                self.closing = true;

                // Mirror the client's close code upstream before stopping.
                let frame = reason.as_ref().map(|r| CloseFrame {
                    code: UpstreamCloseCode::from(u16::from(r.code)),
                    reason: Cow::Owned(r.description.clone().unwrap_or_default()),
                });
                self.relay_to_upstream(UpstreamMessage::Close(frame), ctx);

                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error on proxy session: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<UpstreamFrame> for LiveProxySocket {
    type Result = ();

    fn handle(&mut self, msg: UpstreamFrame, ctx: &mut Self::Context) {
        match msg {
            UpstreamFrame::Text(text) => ctx.text(text),
            UpstreamFrame::Binary(data) => ctx.binary(data),
        }
    }
}

impl Handler<CloseClient> for LiveProxySocket {
    type Result = ();

    fn handle(&mut self, msg: CloseClient, ctx: &mut Self::Context) {
        if self.closing {
            return;
        }
        self.closing = true;

        let reason = msg.code.map(|code| ws::CloseReason {
            code: ws::CloseCode::from(code),
            description: msg.description,
        });
        info!("Closing proxy client: {:?}", reason);
        ctx.close(reason);
        ctx.stop();
    }
}

/// Owns the upstream connection for one session: authenticates, dials, sends
/// setup, then relays until either side ends.
async fn run_upstream(
    upstream: UpstreamConfig,
    tokens: Arc<dyn TokenProvider>,
    addr: Addr<LiveProxySocket>,
    mut from_client: mpsc::Receiver<UpstreamMessage>,
    state: AppState,
) {
    // Credential acquisition, bounded. On any failure the client is closed
    // with 1008 and no upstream connection is attempted.
    let credential_timeout = Duration::from_millis(upstream.credential_timeout_ms);
    let token = match timeout(credential_timeout, tokens.access_token()).await {
        Ok(Ok(token)) => token,
        Ok(Err(err)) => {
            warn!("Credential acquisition failed: {}", err);
            let err = VoiceError::AuthFailed(err.to_string());
            addr.do_send(CloseClient::from_error(&err));
            return;
        }
        Err(_) => {
            warn!("Credential acquisition timed out after {:?}", credential_timeout);
            addr.do_send(CloseClient::from_error(&VoiceError::UpstreamHandshakeTimeout));
            return;
        }
    };

    // Dial upstream with the bearer token in the handshake.
    let request = match build_upstream_request(&upstream, &token) {
        Ok(request) => request,
        Err(err) => {
            error!("Failed to build upstream request: {}", err);
            addr.do_send(CloseClient::from_error(&err));
            return;
        }
    };

    let handshake_timeout = Duration::from_millis(upstream.handshake_timeout_ms);
    let socket = match timeout(handshake_timeout, connect_async(request)).await {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(err)) => {
            warn!("Upstream connect failed: {}", err);
            addr.do_send(CloseClient::from_error(&VoiceError::UpstreamConnectFailed(
                err.to_string(),
            )));
            return;
        }
        Err(_) => {
            warn!("Upstream handshake timed out after {:?}", handshake_timeout);
            addr.do_send(CloseClient::from_error(&VoiceError::UpstreamHandshakeTimeout));
            return;
        }
    };
    info!("Upstream connected: {}", upstream.endpoint_url());

    let (mut write, mut read) = socket.split();

    // The setup message goes out exactly once, before any relayed frames.
    let setup = match serde_json::to_string(&live::setup_message(&upstream)) {
        Ok(setup) => setup,
        Err(err) => {
            error!("Failed to serialize setup message: {}", err);
            addr.do_send(CloseClient::from_error(&VoiceError::UpstreamConnectFailed(
                err.to_string(),
            )));
            return;
        }
    };
    if let Err(err) = write.send(UpstreamMessage::Text(setup)).await {
        warn!("Failed to send setup message: {}", err);
        addr.do_send(CloseClient::from_error(&VoiceError::UpstreamConnectFailed(
            err.to_string(),
        )));
        return;
    }
    debug!("Setup message sent upstream");

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(UpstreamMessage::Text(text))) => {
                    if live::is_setup_ack(&text) {
                        info!("Upstream setup complete");
                    } else {
                        for part in live::extract_model_turn(&text) {
                            match part {
                                live::ModelPart::Text(t) => debug!("Model turn text: {}", t),
                                live::ModelPart::Audio(a) => {
                                    debug!("Model turn audio: {} bytes", a.len())
                                }
                            }
                        }
                    }
                    state.frames_relayed(1);
                    // send().await applies client-side backpressure here.
                    if addr.send(UpstreamFrame::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(UpstreamMessage::Binary(data))) => {
                    state.frames_relayed(1);
                    if addr.send(UpstreamFrame::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(UpstreamMessage::Close(frame))) => {
                    info!("Upstream closed: {:?}", frame);
                    addr.do_send(CloseClient::from_upstream(frame));
                    break;
                }
                Some(Ok(_)) => {} // ping/pong/raw frames stay transport-level
                Some(Err(err)) => {
                    warn!("Upstream read error: {}", err);
                    addr.do_send(CloseClient {
                        code: Some(CLOSE_UPSTREAM_ERROR),
                        description: Some("Upstream connection error".to_string()),
                    });
                    break;
                }
                None => {
                    info!("Upstream stream ended");
                    addr.do_send(CloseClient::from_upstream(None));
                    break;
                }
            },
            outbound = from_client.recv() => match outbound {
                Some(msg) => {
                    let was_close = matches!(msg, UpstreamMessage::Close(_));
                    if let Err(err) = write.send(msg).await {
                        warn!("Upstream write failed: {}", err);
                        addr.do_send(CloseClient {
                            code: Some(CLOSE_UPSTREAM_ERROR),
                            description: Some("Upstream connection error".to_string()),
                        });
                        break;
                    }
                    if was_close {
                        break;
                    }
                }
                None => {
                    // Client actor is gone; say goodbye upstream.
                    let _ = write.send(UpstreamMessage::Close(None)).await;
                    break;
                }
            }
        }
    }

    debug!("Upstream relay ended");
}

fn build_upstream_request(
    upstream: &UpstreamConfig,
    token: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, VoiceError> {
    let mut request = upstream
        .endpoint_url()
        .into_client_request()
        .map_err(|err| VoiceError::UpstreamConnectFailed(err.to_string()))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|err| VoiceError::AuthFailed(err.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    request
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(request)
}

/// HTTP → WebSocket upgrade handler for the proxy path.
pub async fn live_proxy_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    tokens: web::Data<dyn TokenProvider>,
) -> ActixResult<HttpResponse> {
    info!(
        "New live proxy connection from {:?}",
        req.connection_info().peer_addr()
    );

    let config = state.get_config();
    let socket = LiveProxySocket::new(
        state.get_ref().clone(),
        config.upstream.clone(),
        tokens.clone().into_inner(),
    );
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CLOSE_AUTH_FAILED;

    #[test]
    fn test_auth_failure_maps_to_policy_close() {
        let close = CloseClient::from_error(&VoiceError::AuthFailed("no token".into()));
        assert_eq!(close.code, Some(CLOSE_AUTH_FAILED));
        assert_eq!(close.description.as_deref(), Some("Authentication failed"));
    }

    #[test]
    fn test_upstream_failures_map_to_server_error_close() {
        for err in [
            VoiceError::UpstreamConnectFailed("refused".into()),
            VoiceError::UpstreamHandshakeTimeout,
        ] {
            assert_eq!(CloseClient::from_error(&err).code, Some(CLOSE_UPSTREAM_ERROR));
        }
    }

    #[test]
    fn test_upstream_close_codes_are_mirrored() {
        let frame = CloseFrame {
            code: UpstreamCloseCode::from(1011),
            reason: Cow::Borrowed("internal error"),
        };
        let close = CloseClient::from_upstream(Some(frame));
        assert_eq!(close.code, Some(1011));
        assert_eq!(close.description.as_deref(), Some("internal error"));

        // A code-less upstream close turns into a code-less client close.
        let close = CloseClient::from_upstream(None);
        assert_eq!(close.code, None);
    }

    #[test]
    fn test_bearer_header_on_upstream_request() {
        let upstream = UpstreamConfig {
            project: "demo-project".to_string(),
            location: "us-central1".to_string(),
            model: "gemini-live-2.5-flash-native-audio".to_string(),
            response_modality: "AUDIO".to_string(),
            voice_name: "Aoede".to_string(),
            token_source: "env:TEST_TOKEN".to_string(),
            credential_timeout_ms: 10_000,
            handshake_timeout_ms: 15_000,
        };

        let request = build_upstream_request(&upstream, "tok-123").unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer tok-123"
        );
        assert!(request.uri().to_string().starts_with("wss://us-central1-"));
    }
}
