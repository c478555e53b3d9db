//! # Application State Management
//!
//! Shared state accessed by HTTP handlers and WebSocket sessions. Uses the
//! Arc<RwLock<T>> pattern: many readers or one writer, shared across tasks.
//!
//! Per-connection conversation state deliberately does NOT live here — each
//! session owns its own history and ingest channel, so there is no process-wide
//! session table to keep consistent. Only aggregate counters are shared.

use crate::config::AppConfig;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Which kind of WebSocket session a counter refers to.
#[derive(Debug, Clone, Copy)]
pub enum SessionKind {
    /// STT → LLM → TTS pipeline path
    Pipeline,
    /// Live-model duplex proxy path
    Proxy,
}

/// The main application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (readable at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Aggregate runtime metrics, updated by sessions as they run
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (for uptime reporting)
    pub start_time: Instant,
}

/// Aggregate metrics across all connections.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Currently open pipeline sessions
    pub active_pipeline_sessions: u32,

    /// Currently open proxy sessions
    pub active_proxy_sessions: u32,

    /// Conversation turns that produced a full response
    pub turns_completed: u64,

    /// Conversation turns that surfaced a turn-scoped error
    pub turns_failed: u64,

    /// Messages forwarded by the duplex proxy (both directions)
    pub frames_relayed: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Get a snapshot of current metrics.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn session_started(&self, kind: SessionKind) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        match kind {
            SessionKind::Pipeline => metrics.active_pipeline_sessions += 1,
            SessionKind::Proxy => metrics.active_proxy_sessions += 1,
        }
    }

    pub fn session_ended(&self, kind: SessionKind) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        match kind {
            SessionKind::Pipeline => {
                metrics.active_pipeline_sessions = metrics.active_pipeline_sessions.saturating_sub(1)
            }
            SessionKind::Proxy => {
                metrics.active_proxy_sessions = metrics.active_proxy_sessions.saturating_sub(1)
            }
        }
    }

    pub fn turn_completed(&self) {
        self.metrics.write().expect("metrics lock poisoned").turns_completed += 1;
    }

    pub fn turn_failed(&self) {
        self.metrics.write().expect("metrics lock poisoned").turns_failed += 1;
    }

    pub fn frames_relayed(&self, count: u64) {
        self.metrics.write().expect("metrics lock poisoned").frames_relayed += count;
    }
}
