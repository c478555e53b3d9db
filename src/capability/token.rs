//! # Bearer Token Providers
//!
//! The duplex proxy needs an OAuth2 access token before it may open the
//! upstream connection. Where that token comes from is deployment-specific,
//! so it is configured as a `token_source` string:
//!
//! - `env:<VAR>` — read the token from an environment variable (suits
//!   containerized deployments where a sidecar refreshes it)
//! - `command:<argv>` — run a program and use its trimmed stdout (suits
//!   developer machines, e.g. `gcloud auth print-access-token`)

use crate::capability::TokenProvider;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Reads the bearer token from an environment variable on every acquisition,
/// so an externally refreshed value is picked up without a restart.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn access_token(&self) -> VoiceResult<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Ok(_) => Err(VoiceError::AuthFailed(format!(
                "environment variable {} is empty",
                self.var
            ))),
            Err(_) => Err(VoiceError::AuthFailed(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

/// Runs a command and uses its stdout as the bearer token.
pub struct CommandTokenProvider {
    program: String,
    args: Vec<String>,
}

impl CommandTokenProvider {
    pub fn new(argv: &[&str]) -> VoiceResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| VoiceError::AuthFailed("empty token command".to_string()))?;
        Ok(Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[async_trait]
impl TokenProvider for CommandTokenProvider {
    async fn access_token(&self) -> VoiceResult<String> {
        debug!("Acquiring access token via `{}`", self.program);

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| VoiceError::AuthFailed(format!("token command failed to start: {}", e)))?;

        if !output.status.success() {
            return Err(VoiceError::AuthFailed(format!(
                "token command exited with {}",
                output.status
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(VoiceError::AuthFailed(
                "token command produced no output".to_string(),
            ));
        }

        Ok(token)
    }
}

/// Build a token provider from a configured `token_source` string.
pub fn from_source(source: &str) -> VoiceResult<Arc<dyn TokenProvider>> {
    if let Some(var) = source.strip_prefix("env:") {
        return Ok(Arc::new(EnvTokenProvider::new(var)));
    }

    if let Some(argv) = source.strip_prefix("command:") {
        let parts: Vec<&str> = argv.split_whitespace().collect();
        return Ok(Arc::new(CommandTokenProvider::new(&parts)?));
    }

    Err(VoiceError::AuthFailed(format!(
        "unrecognized token source `{}` (expected env:<VAR> or command:<argv>)",
        source
    )))
}
