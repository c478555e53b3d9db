//! # Local-Dev Stub Capabilities
//!
//! Deterministic providers that let the whole pipeline run — socket protocol,
//! ingest channel, turn ordering, synthesis packaging — without any vendor
//! account. Selected with `persona.provider = "stub"` (the default), and used
//! as the capability fakes in the orchestration tests.

use crate::audio::codec;
use crate::capability::{SpeechSynthesizer, SpeechToText, TextGenerator, TranscriptEvent};
use crate::conversation::Message;
use crate::error::VoiceResult;
use crate::session::ingest::AudioStream;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::f32::consts::TAU;
use tokio::sync::mpsc;
use tracing::debug;

/// Emits an interim event every few buffers and one fixed final transcript at
/// end-of-stream. A listening interval that carried no audio produces an
/// empty final transcript, which the orchestrator must ignore.
pub struct StubSpeechToText {
    final_text: String,
    interim_every: usize,
}

impl StubSpeechToText {
    pub fn new(final_text: impl Into<String>) -> Self {
        Self {
            final_text: final_text.into(),
            interim_every: 8,
        }
    }
}

impl Default for StubSpeechToText {
    fn default() -> Self {
        Self::new("Hello there!")
    }
}

#[async_trait]
impl SpeechToText for StubSpeechToText {
    async fn transcribe(
        &self,
        mut audio: AudioStream,
        events: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> VoiceResult<()> {
        let mut buffers = 0usize;
        let mut total_bytes = 0usize;

        while let Some(chunk) = audio.next().await {
            buffers += 1;
            total_bytes += chunk.len();

            if buffers % self.interim_every == 0 {
                let half: String = self
                    .final_text
                    .chars()
                    .take(self.final_text.chars().count() / 2)
                    .collect();
                let _ = events.send(TranscriptEvent {
                    text: format!("{}…", half),
                    is_final: false,
                });
            }
        }

        debug!("Stub transcriber consumed {} bytes in {} buffers", total_bytes, buffers);

        let text = if total_bytes == 0 {
            String::new()
        } else {
            self.final_text.clone()
        };
        let _ = events.send(TranscriptEvent { text, is_final: true });

        Ok(())
    }
}

/// Echoes the utterance back wrapped in the persona's directive contract.
pub struct StubTextGenerator;

#[async_trait]
impl TextGenerator for StubTextGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        history: &[Message],
        utterance: &str,
    ) -> VoiceResult<String> {
        Ok(format!(
            "[emotion: happy] You said \"{}\" — that makes {} messages between us!",
            utterance,
            history.len()
        ))
    }
}

/// Synthesizes a sine tone whose length tracks the text length, as 16-bit
/// little-endian PCM. Enough to exercise playback ordering and lip-sync.
pub struct StubSynthesizer {
    sample_rate: u32,
}

impl StubSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        // ~60ms per character, clamped to something listenable.
        let duration_ms = (text.chars().count() as u64 * 60).clamp(400, 2_000);
        let sample_count = (self.sample_rate as u64 * duration_ms / 1000) as usize;

        let samples: Vec<f32> = (0..sample_count)
            .map(|i| {
                let t = i as f32 / self.sample_rate as f32;
                0.3 * (TAU * 440.0 * t).sin()
            })
            .collect();

        Ok(codec::pcm16_to_bytes(&codec::float_to_pcm16(&samples)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ingest::ingest_channel;
    use actix_web::web::Bytes;

    #[tokio::test]
    async fn test_stub_transcriber_final_after_eos() {
        let (channel, stream) = ingest_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();

        channel.push(Bytes::from_static(&[0u8; 32]));
        drop(channel);

        StubSpeechToText::default().transcribe(stream, tx).await.unwrap();

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        let last = last.expect("no events emitted");
        assert!(last.is_final);
        assert_eq!(last.text, "Hello there!");
    }

    #[tokio::test]
    async fn test_stub_transcriber_empty_final_without_audio() {
        let (channel, stream) = ingest_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(channel);

        StubSpeechToText::default().transcribe(stream, tx).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(event.is_final);
        assert!(event.text.is_empty());
    }

    #[tokio::test]
    async fn test_stub_synthesizer_produces_even_pcm() {
        let audio = StubSynthesizer::new(16_000).synthesize("hi").await.unwrap();
        assert!(!audio.is_empty());
        assert_eq!(audio.len() % 2, 0);
        // 400ms floor at 16kHz, 2 bytes per sample.
        assert_eq!(audio.len(), 16_000 * 2 * 400 / 1000);
    }
}
