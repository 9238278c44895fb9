//! # Audio Transcribe Backend - Main Application Entry Point
//!
//! Multi-user HTTP backend for uploading audio, serving it back with byte
//! ranges, and transcribing it through an external speech-to-text API.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (config.toml + environment variables)
//! - **db**: SQLite persistence, schema migration, retention sweep queries
//! - **auth**: Password hashing, session tokens, request extractors
//! - **storage**: Track files on disk and `Range` parsing
//! - **transcription**: Speech-to-text provider client and engine
//! - **state**: Shared application state and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging, metrics, session resolution
//! - **handlers** / **routes**: HTTP API
//! - **retention**: Periodic inactive-user data sweep
//! - **error**: Error types and HTTP error responses

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod health;
mod middleware;
mod retention;
mod routes;
mod state;
mod storage;
mod transcription;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::db::Database;
use crate::state::AppState;
use crate::storage::Storage;
use crate::transcription::{MistralClient, TranscriptionEngine};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let db = Database::open(&config.database.url).context("Failed to open database")?;
    db.ensure_admin_user(&config.admin).context("Failed to create admin user")?;

    let storage = Storage::new(&config.storage.dir);
    info!(dir = %storage.root().display(), "Track storage ready");

    if config.transcription.api_key.is_empty() {
        warn!("MISTRAL_API_KEY not set; transcription requests will fail until it is configured");
    }
    let provider = MistralClient::new(&config.transcription).context("Failed to build transcription client")?;
    let engine = TranscriptionEngine::new(Arc::new(provider), config.transcription.max_concurrent);

    let app_state = AppState::new(config.clone(), db, storage, engine);
    let retention_task = retention::spawn_retention_task(app_state.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware runs outermost-last: RequestLogging sees the user that
        // SessionMiddleware resolved.
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::SessionMiddleware)
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(routes::configure(&config))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

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

    if let Some(task) = retention_task {
        task.abort();
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` overrides the default filter
/// `audio_transcribe_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Listen for SIGTERM / SIGINT and raise the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown flag, polling every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
