//! # Voice Session Backend - Main Application Entry Point
//!
//! Actix-web server exposing real-time voice and text conversation sessions
//! over websockets, plus a small HTTP API for health, metrics and config.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every session and request handler is asynchronous
//! - **Arc**: provider clients and the tracker are built once and shared
//! - **Result<T, E>**: startup failures propagate to `main` with `?`
//! - **static**: the shutdown flag lives for the entire program
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, TOML file, environment)
//! - **state**: shared application state and metrics
//! - **audio**: PCM/WAV codecs, resampling, the turn buffer and the audio streamer
//! - **providers**: HTTP adapters for transcription, generation and synthesis
//! - **agent**: the agent factory and the conversational turn engine
//! - **session**: the per-connection state machine
//! - **websocket**: the actix actor bridging sockets to sessions
//! - **tracking**: per-session run records
//! - **health**, **handlers**, **middleware**: the HTTP side
//! - **error**: error types and HTTP error responses

mod agent;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod providers;
mod session;
mod state;
mod tracking;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use agent::SessionServices;
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracking::Tracker;

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `config.toml` and the environment
/// 2. **Sets up logging**
/// 3. **Builds the provider clients and tracker** shared by every session
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-session-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let unresolved = config.unresolved_keys();
    if !unresolved.is_empty() {
        warn!("Unresolved environment placeholders: {}", unresolved.join(", "));
    }

    let client = providers::http_client()?;
    let services = SessionServices::from_config(&config, &client)?;
    let tracker = Tracker::from_config(&config.tracking)?;
    if tracker.is_enabled() {
        info!("Tracking runs to {}", config.tracking.path);
    }

    let app_state = AppState::new(config.clone(), services, tracker);
    let shutdown_state = app_state.clone();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestMetrics)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/{endpoint}", web::get().to(websocket::voice_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            shutdown_state.begin_shutdown();
            server_handle.stop(true).await;
        }
    }

    let tracker = Arc::clone(&shutdown_state.tracker);
    if let Err(e) = tokio::task::spawn_blocking(move || tracker.flush()).await {
        warn!("Failed to flush tracking records: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls filtering; defaults to `voice_session_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_session_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
