//! # HTTP Handlers
//!
//! Route table for the relay. The two pipeline endpoints sit at the root
//! because the browser client calls them there; health and metrics are served
//! both at the root and under `/api/v1`.

pub mod completion;
pub mod transcribe;

pub use completion::*;
pub use transcribe::*;

use crate::error::AppError;
use crate::health;
use actix_web::error::JsonPayloadError;
use actix_web::web;

/// Register every route on an actix `App` or scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/stt", web::post().to(transcribe_audio))
        .route("/groq", web::post().to(stream_completion))
        .route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        );
}

/// Malformed bodies, unknown roles and unknown styles all come back as a
/// 400 with the usual `{"error": ...}` body.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let message = match &err {
            JsonPayloadError::Deserialize(e) => format!("Invalid request body: {}", e),
            other => other.to_string(),
        };
        AppError::ValidationError(message).into()
    })
}
