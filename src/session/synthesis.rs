//! # Synthesis Relay
//!
//! Invokes the text-to-speech capability and packages the audio for the wire.
//! No retries here: by the time synthesis runs, the text response has already
//! been delivered, so a failure only costs the audio — the caller reports it
//! and moves on.

use crate::audio::codec;
use crate::capability::SpeechSynthesizer;
use crate::error::VoiceResult;
use std::sync::Arc;
use tracing::debug;

pub struct SynthesisRelay {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl SynthesisRelay {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synthesizer }
    }

    /// Synthesize `text` and return the base64 payload for a
    /// `response-audio` notification.
    pub async fn synthesize(&self, text: &str) -> VoiceResult<String> {
        let audio = self.synthesizer.synthesize(text).await?;
        debug!("Synthesized {} bytes of speech", audio.len());
        Ok(codec::encode_base64(&audio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::stub::StubSynthesizer;

    #[tokio::test]
    async fn test_synthesize_packages_nonempty_base64() {
        let relay = SynthesisRelay::new(Arc::new(StubSynthesizer::new(16_000)));
        let payload = relay.synthesize("hello").await.unwrap();
        assert!(!payload.is_empty());
        assert!(!codec::decode_base64(&payload).unwrap().is_empty());
    }
}
