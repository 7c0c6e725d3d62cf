//! # Voice Relay - Server Entry Point
//!
//! Starts the actix-web server that relays recorded audio to a transcription
//! provider and prompts to a streaming completion provider.
//!
//! ## Startup:
//! 1. **Loads configuration** from config.toml, `APP_*` variables and `.env`
//! 2. **Sets up logging** with tracing
//! 3. **Builds the provider clients** sharing one HTTP connection pool
//! 4. **Serves** `/stt`, `/groq` and the health endpoints
//! 5. **Shuts down gracefully** on SIGINT/SIGTERM, letting open streams finish

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_relay::config::{AppConfig, API_KEY_ENV};
use voice_relay::handlers;
use voice_relay::middleware::{MetricsMiddleware, RequestLogging};
use voice_relay::providers::{build_http_client, GroqCompletions, GroqTranscriptions};
use voice_relay::state::AppState;

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        base_url = %config.providers.base_url,
        transcription_model = %config.providers.transcription_model,
        completion_model = %config.providers.completion_model,
        upload_dir = %config.upload_dir().display(),
        "Configuration loaded"
    );
    if !config.has_api_key() {
        warn!("{} is not set; provider calls will be rejected", API_KEY_ENV);
    }

    let http_client = build_http_client(&config.providers.api_key)?;
    let transcriber = GroqTranscriptions::new(
        http_client.clone(),
        config.providers.base_url.clone(),
        config.providers.transcription_model.clone(),
    );
    let completions = GroqCompletions::new(
        http_client,
        config.providers.base_url.clone(),
        config.providers.completion_model.clone(),
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = web::Data::new(AppState::new(config, Arc::new(transcriber), Arc::new(completions)));

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // The browser client may be served from another origin
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            // Middleware runs in reverse order of registration for requests
            .wrap(cors)
            .wrap(MetricsMiddleware)
            .wrap(RequestLogging)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .disable_signals()
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
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls verbosity; defaults to `voice_relay=debug,actix_web=info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGTERM or SIGINT.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers ({}), falling back to Ctrl+C", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
