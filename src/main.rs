//! # Hiragana Speech Backend - Main Application Entry Point
//!
//! An inference-serving HTTP backend for hiragana phoneme recognition from
//! short audio clips.
//!
//! ## Application architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and request metrics
//! - **audio**: decode/resample/fixed-length audio normalization
//! - **inference**: the candle classifier, predict engine, and ranker
//! - **handlers**: the `/predict` and `/predict_file` request pipeline
//! - **health**: `/health` and `/metrics` endpoints
//! - **middleware**: request counting
//! - **error**: the pipeline error taxonomy and its HTTP mapping

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod inference;
mod labels;
mod middleware;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use inference::InferenceEngine;
use state::AppState;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting hiragana-speech-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("API key configured: {}", config.auth.api_key.is_some());

    let engine = init_engine(&config)?;

    let app_state = AppState::new(config.clone(), engine);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let max_body_bytes = config.max_request_size_bytes();

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
            .app_data(web::JsonConfig::default().limit(max_body_bytes))
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/predict", web::post().to(handlers::predict))
            .route("/predict_file", web::post().to(handlers::predict_file))
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

/// Load the classifier, honoring the strict-startup flag.
///
/// With `strict_startup` unset a failed load leaves the server running in
/// degraded mode: `/health` reports `model_loaded=false` and predictions
/// fail inside the envelope until the process is restarted with a valid
/// model container.
fn init_engine(config: &AppConfig) -> Result<InferenceEngine> {
    match InferenceEngine::load(Path::new(&config.model.path)) {
        Ok(engine) => Ok(engine),
        Err(err) if config.model.strict_startup => Err(anyhow::anyhow!(
            "model load failed with strict_startup enabled: {}",
            err
        )),
        Err(err) => {
            error!("Failed to load model: {}", err);
            warn!("Serving without a model; /predict will report model_not_loaded");
            Ok(InferenceEngine::unloaded())
        }
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default
/// filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hiragana_speech_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
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

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
