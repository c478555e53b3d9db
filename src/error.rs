//! # Error Handling
//!
//! Defines the error taxonomy for the voice pipeline and the live-model proxy,
//! plus how each error reaches the client.
//!
//! ## Error Categories:
//! - **Connection-fatal**: credential or upstream handshake failures. These close
//!   the WebSocket with a distinguishing close code and the connection is over.
//! - **Turn-scoped**: recognition, generation, or synthesis failures for a single
//!   utterance. These are reported as an `error` notification and the session
//!   keeps accepting further utterances.
//! - **Ignorable**: malformed control messages are logged and dropped; the
//!   connection survives.
//!
//! The split matters for clients: they must be able to tell "connection ended"
//! apart from "one turn failed, try again".

use std::fmt;

/// WebSocket close code sent when credential acquisition fails (policy violation).
pub const CLOSE_AUTH_FAILED: u16 = 1008;

/// WebSocket close code sent when the upstream connection fails or errors out.
pub const CLOSE_UPSTREAM_ERROR: u16 = 1011;

/// All failure modes of the conversation orchestration and relay layers.
#[derive(Debug)]
pub enum VoiceError {
    /// Bearer credential acquisition failed. Proxy closes the client with 1008
    /// and never attempts the upstream connection.
    AuthFailed(String),

    /// Could not open the upstream bidirectional connection.
    UpstreamConnectFailed(String),

    /// Credential acquisition or upstream handshake exceeded the configured
    /// application-level timeout (distinct from any transport timeout).
    UpstreamHandshakeTimeout,

    /// The speech-to-text stream failed for one utterance. Session survives.
    RecognitionFailed(String),

    /// Text generation failed for one turn. The user utterance that triggered
    /// it stays in the conversation history.
    GenerationFailed(String),

    /// Text-to-speech failed for one turn. The text response has already been
    /// delivered at this point; only the audio is missing.
    SynthesisFailed(String),

    /// Client sent a text frame that is not a recognized control message.
    MalformedControlMessage(String),
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::AuthFailed(msg) => write!(f, "credential acquisition failed: {}", msg),
            VoiceError::UpstreamConnectFailed(msg) => write!(f, "upstream connect failed: {}", msg),
            VoiceError::UpstreamHandshakeTimeout => write!(f, "upstream handshake timed out"),
            VoiceError::RecognitionFailed(msg) => write!(f, "speech recognition failed: {}", msg),
            VoiceError::GenerationFailed(msg) => write!(f, "response generation failed: {}", msg),
            VoiceError::SynthesisFailed(msg) => write!(f, "speech synthesis failed: {}", msg),
            VoiceError::MalformedControlMessage(msg) => {
                write!(f, "malformed control message: {}", msg)
            }
        }
    }
}

impl std::error::Error for VoiceError {}

impl VoiceError {
    /// Whether this error terminates the connection (as opposed to one turn).
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::AuthFailed(_)
                | VoiceError::UpstreamConnectFailed(_)
                | VoiceError::UpstreamHandshakeTimeout
        )
    }

    /// Close code used when this error terminates the connection.
    ///
    /// Returns `None` for turn-scoped errors, which never close the socket.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            VoiceError::AuthFailed(_) => Some(CLOSE_AUTH_FAILED),
            VoiceError::UpstreamConnectFailed(_) | VoiceError::UpstreamHandshakeTimeout => {
                Some(CLOSE_UPSTREAM_ERROR)
            }
            _ => None,
        }
    }

    /// Short, stable message delivered to the client in `error` notifications.
    ///
    /// Internal detail strings stay in the server logs; clients get a phrase
    /// they can show verbatim.
    pub fn client_message(&self) -> &'static str {
        match self {
            VoiceError::AuthFailed(_) => "Authentication failed",
            VoiceError::UpstreamConnectFailed(_) => "Upstream connection error",
            VoiceError::UpstreamHandshakeTimeout => "Upstream connection timed out",
            VoiceError::RecognitionFailed(_) => "Speech recognition error",
            VoiceError::GenerationFailed(_) => "Failed to generate response",
            VoiceError::SynthesisFailed(_) => "Failed to synthesize speech",
            VoiceError::MalformedControlMessage(_) => "Invalid control message",
        }
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::MalformedControlMessage(err.to_string())
    }
}

/// Shorthand for results in the orchestration and relay layers.
pub type VoiceResult<T> = Result<T, VoiceError>;
