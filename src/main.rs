//! # Speaking Exam Backend - Main Application Entry Point
//!
//! This is the main entry point for the speaking-exam-backend web server.
//! It runs simulated three-part speaking examinations: a candidate connects
//! over a WebSocket, answers spoken questions, and receives transcriptions,
//! examiner replies, synthesized speech and scored feedback.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every request and every exam turn is asynchronous
//! - **modules**: code is organized into separate modules (mod statements)
//! - **Result<T, E>**: error handling using Rust's Result type
//! - **Trait objects**: the speech and language services sit behind traits,
//!   so the HTTP client can be swapped for fakes in tests
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML files + environment variables)
//! - **state**: shared application state and metrics
//! - **exam**: sessions, phases, the question pool, scoring and the turn pipeline
//! - **collaborators**: clients for transcription, examiner replies, speech
//!   synthesis and evaluation
//! - **websocket**: the live examination connection
//! - **health**: system health monitoring endpoints
//! - **middleware**: custom request processing logic (logging, metrics)
//! - **handlers**: HTTP request handlers for API endpoints
//! - **error**: custom error types and HTTP error responses

// Module declarations - These tell Rust about our other source files
mod collaborators; // Speech and language service clients (collaborators/ directory)
mod config;        // Configuration management (config.rs)
mod error;         // Error handling types (error.rs)
mod exam;          // Examination domain (exam/ directory)
mod handlers;      // HTTP request handlers (handlers/ directory)
mod health;        // Health check endpoints (health.rs)
mod middleware;    // Custom middleware (middleware/ directory)
mod state;         // Application state management (state.rs)
mod websocket;     // Live examination connections (websocket.rs)

// External crate imports - These are dependencies from Cargo.toml
use std::sync::Arc;

use actix_cors::Cors;                      // Cross-Origin Resource Sharing support
use actix_web::{web, App, HttpServer};     // Web framework
use anyhow::Result;                        // Better error handling with context
use tracing::{error, info, warn};          // Structured logging
use tracing_actix_web::TracingLogger;      // One tracing span per request
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::collaborators::{AiServiceClient, Collaborators};
use crate::config::AppConfig;
use crate::state::AppState;

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Connects the AI service client** used for every exam turn
/// 4. **Creates shared application state** that all requests can access
/// 5. **Configures the HTTP server** with middleware and routes
/// 6. **Handles graceful shutdown** when receiving system signals
///
/// ## Error Handling:
/// If any step fails (config loading, client setup, server binding), the
/// function returns an error and the program exits with an error message.
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speaking-exam-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("AI service: {}", config.ai.base_url);

    // One HTTP client for the whole process; reqwest pools connections internally
    let client = Arc::new(AiServiceClient::new(
        &config.ai.base_url,
        config.collaborator_timeout(),
    )?);
    let collaborators = Collaborators::from_client(client);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = web::Data::new(AppState::new(config, collaborators));

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            // `web::Data` is already an Arc, so every worker shares one state
            .app_data(app_state.clone())
            // Malformed bodies and query strings get the JSON error body too
            .app_data(error::json_config())
            .app_data(error::query_config())
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/sessions", web::post().to(handlers::create_session))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{id}", web::get().to(handlers::get_session))
                    .route("/sessions/{id}", web::delete().to(handlers::end_session))
                    .route("/questions", web::post().to(handlers::generate_question))
                    .route("/feedback", web::post().to(handlers::quick_feedback))
                    .route("/evaluations/batch", web::post().to(handlers::evaluate_batch))
                    .route(
                        "/evaluations/aggregate",
                        web::post().to(handlers::aggregate_evaluations),
                    )
                    .route("/evaluations/answer", web::post().to(handlers::evaluate_answer)),
            )
            .route("/ws/exam", web::get().to(websocket::exam_websocket))
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    // Get a handle to control the server and spawn it in a separate task
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // tokio::select! is a "race": whichever finishes first wins
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            // Graceful: in-flight requests finish, open sockets are closed
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: controls what gets logged (e.g. "debug", "speaking_exam_backend=trace")
/// - If not set, defaults to "speaking_exam_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speaking_exam_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve when the process is asked to stop (Ctrl+C or SIGTERM).
///
/// ## Rust Concepts:
/// - **std::future::pending**: a future that never completes; used when a
///   signal handler cannot be installed so that the other branch still works
/// - **#[cfg(unix)]**: SIGTERM only exists on Unix platforms
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
