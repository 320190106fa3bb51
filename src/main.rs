//! # Vocal Health Backend - Main Application Entry Point
//!
//! HTTP service with two jobs:
//! - **Diagnosis**: `POST /process_audio` runs an uploaded recording through the
//!   diagnostic engine, publishes the PDF report and returns a structured summary
//! - **Assistant**: `POST /chat` answers vocal-health questions with per-session memory
//!
//! ## Application Architecture:
//! - **config**: Configuration (TOML file + environment variables)
//! - **state**: Shared application state and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and metrics
//! - **handlers**: HTTP request handlers
//! - **diagnosis**: Upload staging, engine, report publishing and formatting
//! - **chat**: Conversation history, sessions and the chat-completion client
//! - **error**: Error taxonomy and its JSON responses

mod chat;        // Vocal-health assistant (chat/ directory)
mod config;      // Configuration management (config.rs)
mod diagnosis;   // Audio diagnosis pipeline (diagnosis/ directory)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod state;       // Application state management (state.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::chat::{ConversationSessionManager, OpenAiCompatibleClient};
use crate::config::AppConfig;
use crate::diagnosis::{CloudinaryPublisher, CommandEngine, DiagnosisOrchestrator};
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// How often idle chat sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Builds the collaborators** (engine, report store, chat client)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // .ok(): running without a .env file is normal
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    if config.chat.api_key.is_empty() {
        warn!("No chat API key configured; /chat requests will fail until GROQ_API_KEY is set");
    }
    if !config.publisher.has_credentials() {
        warn!("Report store not configured; /process_audio requests will fail at upload");
    }

    let engine = Arc::new(CommandEngine::new(&config.engine));
    let publisher = Arc::new(CloudinaryPublisher::new(&config.publisher));
    let orchestrator = DiagnosisOrchestrator::new(engine, publisher, &config.upload)
        .with_context(|| format!("Failed to create upload directory {}", config.upload.dir))?;
    info!(
        engine = %orchestrator.engine_description(),
        store = %orchestrator.publisher_description(),
        upload_dir = %orchestrator.upload_dir().display(),
        "Diagnosis pipeline ready"
    );

    let chat_client = Arc::new(
        OpenAiCompatibleClient::new(&config.chat).context("Failed to build chat API client")?,
    );
    let sessions = Arc::new(ConversationSessionManager::new(chat_client, &config.chat));

    let app_state = AppState::new(config.clone(), Arc::new(orchestrator), sessions.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    spawn_session_sweeper(sessions, config.chat.session_idle_secs);

    info!("Starting HTTP server on {}", bind_addr);

    let allowed_origins = config.cors.allowed_origins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(handlers::json_config())
            // Middleware runs bottom-up for requests
            .wrap(middleware::MetricsMiddleware)
            .wrap(build_cors(&allowed_origins))
            .wrap(middleware::RequestLogging)
            .configure(diagnosis_and_chat_routes)
            .service(web::scope("/api").configure(diagnosis_and_chat_routes))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
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

    info!("Server stopped gracefully");
    Ok(())
}

/// The two public routes, mounted both at the root and under `/api`.
fn diagnosis_and_chat_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/process_audio", web::post().to(handlers::process_audio))
        .route("/chat", web::post().to(handlers::chat));
}

/// CORS policy: the configured origins, or any origin when none are listed.
fn build_cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    if allowed_origins.is_empty() {
        cors.allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "vocal_health_backend=trace")
/// - If not set, defaults to "vocal_health_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vocal_health_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Periodically drop chat sessions nobody has used for `idle_secs`.
///
/// An `idle_secs` of 0 disables the sweep; sessions are then only removed
/// when the store is full.
fn spawn_session_sweeper(sessions: Arc<ConversationSessionManager>, idle_secs: u64) {
    if idle_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
                break;
            }
            sessions.evict_idle(idle_secs).await;
        }
    });
}

/// Set up signal handlers for graceful shutdown (SIGTERM and SIGINT).
///
/// If a handler can't be installed the server still runs; it just can't be
/// stopped gracefully by that signal.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (term, int) => {
                error!(
                    sigterm_ok = term.is_ok(),
                    sigint_ok = int.is_ok(),
                    "Failed to install signal handlers"
                );
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

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
