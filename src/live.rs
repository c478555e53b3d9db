//! # Live-Model Wire Formats
//!
//! Typed JSON envelopes for the upstream bidirectional speech model. The
//! relay itself forwards frames verbatim; these types exist for the two
//! places the server does speak the protocol — the one-time setup message and
//! setup-ack detection — plus the pure codec helpers a playback-owning client
//! uses to build microphone chunks and unpack model turns.
//!
//! Field names follow the upstream API exactly (camelCase), so every struct
//! here is serde-renamed rather than idiomatic snake_case on the wire.

use crate::audio::codec;
use crate::config::UpstreamConfig;
use crate::persona;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// The one message the proxy itself writes upstream, sent immediately after
/// the handshake and before any client frames are relayed.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SetupEnvelope {
    pub setup: Setup,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully-qualified model resource name.
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TextPart {
    pub text: String,
}

/// Build the setup envelope for the configured model, voice, and persona.
pub fn setup_message(upstream: &UpstreamConfig) -> SetupEnvelope {
    SetupEnvelope {
        setup: Setup {
            model: upstream.model_resource(),
            generation_config: GenerationConfig {
                response_modalities: vec![upstream.response_modality.clone()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: upstream.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: persona::LIVE_SYSTEM_PROMPT.to_string(),
                }],
            },
        },
    }
}

/// Whether an upstream text frame is the setup acknowledgement.
///
/// The ack is an object carrying a `setupComplete` member; upstream sends it
/// once, and the relay only notes it in the logs — the frame still reaches
/// the client verbatim.
pub fn is_setup_ack(frame: &str) -> bool {
    match serde_json::from_str::<Value>(frame) {
        Ok(value) => match value.get("setupComplete") {
            Some(Value::Null) | Some(Value::Bool(false)) | None => false,
            Some(_) => true,
        },
        Err(_) => false,
    }
}

/// Wrap one microphone PCM buffer in the `realtimeInput.mediaChunks`
/// envelope expected upstream.
pub fn media_chunk(pcm: &[u8], sample_rate: u32) -> Value {
    serde_json::json!({
        "realtimeInput": {
            "mediaChunks": [
                {
                    "mimeType": format!("audio/pcm;rate={}", sample_rate),
                    "data": codec::encode_base64(pcm),
                }
            ]
        }
    })
}

/// One part of a model turn, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPart {
    Text(String),
    /// Raw PCM bytes decoded from the inline base64 payload.
    Audio(Vec<u8>),
}

/// Pull the text and inline-audio parts out of a `serverContent.modelTurn`
/// frame. Frames that are not model turns (acks, turn-complete markers)
/// yield an empty list; parts with undecodable audio are skipped.
pub fn extract_model_turn(frame: &str) -> Vec<ModelPart> {
    let Ok(value) = serde_json::from_str::<Value>(frame) else {
        return Vec::new();
    };

    let Some(parts) = value
        .pointer("/serverContent/modelTurn/parts")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push(ModelPart::Text(text.to_string()));
        }
        if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
            match codec::decode_base64(data) {
                Ok(bytes) => out.push(ModelPart::Audio(bytes)),
                Err(err) => warn!("Skipping undecodable inline audio part: {}", err),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_upstream() -> UpstreamConfig {
        UpstreamConfig {
            project: "demo-project".to_string(),
            location: "us-central1".to_string(),
            model: "gemini-live-2.5-flash-native-audio".to_string(),
            response_modality: "AUDIO".to_string(),
            voice_name: "Aoede".to_string(),
            token_source: "env:TEST_TOKEN".to_string(),
            credential_timeout_ms: 10_000,
            handshake_timeout_ms: 15_000,
        }
    }

    #[test]
    fn test_setup_message_shape() {
        let json = serde_json::to_value(setup_message(&test_upstream())).unwrap();
        assert_eq!(
            json["setup"]["model"],
            "projects/demo-project/locations/us-central1/publishers/google/models/gemini-live-2.5-flash-native-audio"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        let instruction = json["setup"]["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(!instruction.is_empty());
    }

    #[test]
    fn test_setup_ack_detection() {
        assert!(is_setup_ack(r#"{"setupComplete":{}}"#));
        assert!(is_setup_ack(r#"{"setupComplete":true}"#));
        assert!(!is_setup_ack(r#"{"setupComplete":null}"#));
        assert!(!is_setup_ack(r#"{"serverContent":{}}"#));
        assert!(!is_setup_ack("not json"));
    }

    #[test]
    fn test_media_chunk_envelope() {
        let chunk = media_chunk(&[1, 2, 3, 4], 16_000);
        let entry = &chunk["realtimeInput"]["mediaChunks"][0];
        assert_eq!(entry["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(
            codec::decode_base64(entry["data"].as_str().unwrap()).unwrap(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn test_extract_model_turn_parts() {
        let frame = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "text": "hello" },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000",
                                          "data": codec::encode_base64(&[0, 1, 0, 2]) } }
                    ]
                }
            }
        })
        .to_string();

        let parts = extract_model_turn(&frame);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], ModelPart::Text("hello".to_string()));
        assert_eq!(parts[1], ModelPart::Audio(vec![0, 1, 0, 2]));
    }

    #[test]
    fn test_non_turn_frames_yield_nothing() {
        assert!(extract_model_turn(r#"{"setupComplete":{}}"#).is_empty());
        assert!(extract_model_turn(r#"{"serverContent":{"turnComplete":true}}"#).is_empty());
        assert!(extract_model_turn("garbage").is_empty());
    }
}
