//! # Capability Interfaces
//!
//! The external speech-to-text, text-generation, text-to-speech, and identity
//! services are consumed behind these traits. The orchestration layer never
//! sees a vendor SDK — it sees a capability that can fail, and decides what
//! that failure means for the session.
//!
//! ## Implementations:
//! - **token**: bearer-credential providers (environment variable, command)
//! - **stub**: deterministic local-dev providers, selected with
//!   `persona.provider = "stub"`, so the server runs end-to-end without any
//!   vendor credentials

pub mod stub;
pub mod token;

use crate::conversation::Message;
use crate::error::VoiceResult;
use crate::session::ingest::AudioStream;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One transcription update from the speech-to-text capability.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    /// Only final events progress the conversation; interim events are
    /// forwarded for live display.
    pub is_final: bool,
}

/// Speech-to-text over a live audio stream.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Consume the pulled audio stream to end-of-stream, pushing interim and
    /// final transcripts into `events` as they become available.
    ///
    /// Returning `Err` means the recognition stream itself broke; a clean
    /// end-of-stream (ingest channel closed) is `Ok`.
    async fn transcribe(
        &self,
        audio: AudioStream,
        events: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> VoiceResult<()>;
}

/// Text generation with persona instructions and conversation context.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply to `utterance` given the persona's system prompt and
    /// a most-recent window of the conversation, oldest-first.
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[Message],
        utterance: &str,
    ) -> VoiceResult<String>;
}

/// Text-to-speech synthesis.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into raw 16-bit little-endian PCM bytes.
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Bearer-credential acquisition for the upstream live-model endpoint.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> VoiceResult<String>;
}

/// The capability set one pipeline session runs against, chosen once at
/// startup from `persona.provider`.
#[derive(Clone)]
pub struct PipelineCapabilities {
    pub speech_to_text: std::sync::Arc<dyn SpeechToText>,
    pub generator: std::sync::Arc<dyn TextGenerator>,
    pub synthesizer: std::sync::Arc<dyn SpeechSynthesizer>,
}

impl PipelineCapabilities {
    pub fn from_config(config: &crate::config::AppConfig) -> anyhow::Result<Self> {
        match config.persona.provider.as_str() {
            "stub" => Ok(Self {
                speech_to_text: std::sync::Arc::new(stub::StubSpeechToText::default()),
                generator: std::sync::Arc::new(stub::StubTextGenerator),
                synthesizer: std::sync::Arc::new(stub::StubSynthesizer::new(
                    config.audio.output_sample_rate,
                )),
            }),
            other => Err(anyhow::anyhow!(
                "unknown pipeline capability provider `{}` (available: stub)",
                other
            )),
        }
    }
}
