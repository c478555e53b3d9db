//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_UPSTREAM_PROJECT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are honored without the prefix because deployment
//! platforms commonly inject them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub persona: PersonaConfig,
    pub upstream: UpstreamConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio format settings for the pipeline path.
///
/// The client captures microphone audio at a browser-native rate and
/// downsamples before sending, so the server only ever sees `input_sample_rate`
/// PCM. Synthesized speech is returned at `output_sample_rate`; the live model
/// produces audio at `live_sample_rate` (fixed by the upstream service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of microphone PCM arriving over the socket (Hz)
    pub input_sample_rate: u32,

    /// Sample rate of synthesized speech returned to the client (Hz)
    pub output_sample_rate: u32,

    /// Sample rate of live-model audio chunks (Hz)
    pub live_sample_rate: u32,

    /// Number of audio channels (mono expected)
    pub channels: u8,

    /// Bit depth (16-bit PCM expected)
    pub bit_depth: u8,
}

/// Persona and pipeline-capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Capability provider for the STT/LLM/TTS pipeline.
    /// `"stub"` selects the deterministic local-dev providers.
    pub provider: String,

    /// Text-generation model identifier passed to the provider
    pub llm_model: String,

    /// Synthesis voice name passed to the provider
    pub voice_name: String,
}

/// Upstream live-model (bidirectional audio) settings for the proxy path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Google Cloud project hosting the live model
    pub project: String,

    /// Regional endpoint location
    pub location: String,

    /// Live model identifier
    pub model: String,

    /// Desired response modality ("AUDIO" or "TEXT")
    pub response_modality: String,

    /// Prebuilt voice used for live-model speech
    pub voice_name: String,

    /// Where bearer tokens come from: `env:<VAR>` reads an environment
    /// variable, `command:<argv>` runs a program and uses its stdout
    pub token_source: String,

    /// Application-level timeout for credential acquisition (ms)
    pub credential_timeout_ms: u64,

    /// Application-level timeout for the upstream WebSocket handshake (ms)
    pub handshake_timeout_ms: u64,
}

impl UpstreamConfig {
    /// WebSocket URL of the upstream bidirectional endpoint.
    pub fn endpoint_url(&self) -> String {
        format!(
            "wss://{}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent",
            self.location
        )
    }

    /// Fully-qualified model resource name used in the setup message.
    pub fn model_resource(&self) -> String {
        format!(
            "projects/{}/locations/{}/publishers/google/models/{}",
            self.project, self.location, self.model
        )
    }
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of concurrent voice sessions (pipeline + proxy)
    pub max_concurrent_sessions: usize,

    /// How many recent messages are handed to the text generator per turn
    pub history_window: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
            },
            audio: AudioConfig {
                input_sample_rate: 16_000, // what the transcriber expects
                output_sample_rate: 16_000,
                live_sample_rate: 24_000, // fixed by the live model
                channels: 1,
                bit_depth: 16,
            },
            persona: PersonaConfig {
                provider: "stub".to_string(),
                llm_model: "gemini-2.0-flash-001".to_string(),
                voice_name: "Aoede".to_string(),
            },
            upstream: UpstreamConfig {
                project: String::new(), // must be configured for the proxy path
                location: "us-central1".to_string(),
                model: "gemini-live-2.5-flash-native-audio".to_string(),
                response_modality: "AUDIO".to_string(),
                voice_name: "Aoede".to_string(),
                token_source: "command:gcloud auth print-access-token".to_string(),
                credential_timeout_ms: 10_000,
                handshake_timeout_ms: 15_000,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                history_window: 20,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment variables.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms set these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup beats failing on the first
    /// connection.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!(
                "Only 16-bit PCM is supported, got {}",
                self.audio.bit_depth
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.history_window == 0 {
            return Err(anyhow::anyhow!("History window must be greater than 0"));
        }

        if self.upstream.credential_timeout_ms == 0 || self.upstream.handshake_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream timeouts must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.performance.history_window, 20);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bit_depth = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upstream_urls() {
        let mut config = AppConfig::default();
        config.upstream.project = "demo-project".to_string();

        assert!(config
            .upstream
            .endpoint_url()
            .starts_with("wss://us-central1-aiplatform.googleapis.com/ws/"));
        assert_eq!(
            config.upstream.model_resource(),
            "projects/demo-project/locations/us-central1/publishers/google/models/gemini-live-2.5-flash-native-audio"
        );
    }
}
