//! # External Providers
//!
//! The relay talks to two OpenAI-compatible HTTP services: one that turns an
//! audio file into text and one that streams a chat completion. Both are
//! consumed behind traits so the HTTP handlers can be exercised against stubs.
//!
//! ## Contract:
//! - A single call per user action. Nothing here retries.
//! - No timeout is layered on top of the transport defaults.
//! - One `reqwest::Client` is built at startup and shared by both providers;
//!   it carries the bearer credential as a default header.

pub mod completion;
pub mod transcription;

pub use completion::{CompletionProvider, FragmentStream, GroqCompletions};
pub use transcription::{GroqTranscriptions, TranscriptionProvider};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider payload: {0}")]
    Decode(String),

    #[error("failed to read audio artifact: {0}")]
    Artifact(#[from] std::io::Error),
}

impl From<crate::sse::FrameError> for ProviderError {
    fn from(err: crate::sse::FrameError) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

/// Build the HTTP client shared by both providers.
pub fn build_http_client(api_key: &str) -> anyhow::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();

    if !api_key.trim().is_empty() {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(concat!("voice-relay/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Turn a non-2xx response into a `ProviderError::Status`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
