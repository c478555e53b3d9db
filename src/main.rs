//! # Avatar Voice Backend - Main Application Entry Point
//!
//! Real-time voice conversation server for a persona-driven avatar client.
//! One Actix-web server carries two WebSocket paths plus plain HTTP health
//! endpoints:
//!
//! ## Application Architecture:
//! - **config**: Configuration management (TOML file + environment variables)
//! - **state**: Shared application state and aggregate metrics
//! - **error**: The error taxonomy shared by both WebSocket paths
//! - **conversation**: Message, emotion, and history types
//! - **persona**: System prompts for the pipeline and live-model paths
//! - **audio**: PCM codec helpers and the client playback queue
//! - **capability**: Speech/LLM/TTS/token interfaces plus local-dev stubs
//! - **session**: The STT → LLM → TTS pipeline WebSocket (default path)
//! - **live / proxy**: The authenticated duplex relay to the upstream
//!   bidirectional speech model (`/vertex-live`)
//! - **health**: Health and metrics endpoints

mod audio;
mod capability;
mod config;
mod conversation;
mod error;
mod health;
mod live;
mod persona;
mod proxy;
mod session;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use capability::PipelineCapabilities;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present; fine if it's missing.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting avatar-voice-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    // Capabilities and token provider are chosen once at startup; every
    // session shares them.
    let capabilities = PipelineCapabilities::from_config(&config)?;
    let token_provider = capability::token::from_source(&config.upstream.token_source)?;
    info!(
        "Pipeline provider: {}, token source: {}",
        config.persona.provider, config.upstream.token_source
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Browser clients connect directly, so CORS stays permissive.
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(capabilities.clone()))
            .app_data(web::Data::from(token_provider.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            // Upgrade-path dispatch: /vertex-live reaches the duplex proxy,
            // every other path lands on the pipeline session.
            .route("/vertex-live", web::get().to(proxy::live_proxy_websocket))
            .default_service(web::get().to(session::pipeline_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls the filter; without it, application debug logs and
/// actix-web info logs are shown.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avatar_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag; returns once shutdown has been requested.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
