//! # Pipeline Session Module
//!
//! The per-connection orchestration for the STT → LLM → TTS backend:
//!
//! - **ingest**: push→pull adapter between the WebSocket message handler and
//!   the speech-to-text capability
//! - **composer**: text generation plus emotion-directive extraction
//! - **synthesis**: text-to-speech invocation and wire packaging
//! - **socket**: the WebSocket actor running the session state machine
//!   (Idle → Listening → per-turn Composing/Synthesizing → Listening)

pub mod composer;
pub mod ingest;
pub mod socket;
pub mod synthesis;

pub use socket::pipeline_websocket;
