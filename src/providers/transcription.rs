//! Speech-to-text gateway.

use super::{check_status, endpoint, ProviderError};
use crate::artifact::ArtifactHandle;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

/// Sends a stored audio artifact to a transcription provider.
///
/// An empty string is a valid result (nothing was said).
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, artifact: &ArtifactHandle) -> Result<String, ProviderError>;

    /// Model identifier, reported by the health endpoint.
    fn model(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
#[derive(Debug, Clone)]
pub struct GroqTranscriptions {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GroqTranscriptions {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TranscriptionProvider for GroqTranscriptions {
    async fn transcribe(&self, artifact: &ArtifactHandle) -> Result<String, ProviderError> {
        let start_time = Instant::now();
        let audio = tokio::fs::read(artifact.path()).await?;

        let audio_part = Part::bytes(audio)
            .file_name(artifact.file_name())
            .mime_str(artifact.mime_type())?;

        let form = Form::new()
            .part("file", audio_part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        let url = endpoint(&self.base_url, "audio/transcriptions");
        debug!(url = %url, size_bytes = artifact.size_bytes(), "Sending transcription request");

        let response = self.client.post(&url).multipart(form).send().await?;
        let response = check_status(response).await?;

        let body = response.bytes().await?;
        let parsed: TranscriptionResponse =
            serde_json::from_slice(&body).map_err(|e| ProviderError::Decode(e.to_string()))?;

        debug!(
            chars = parsed.text.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Transcription completed"
        );
        Ok(parsed.text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let parsed: TranscriptionResponse =
            serde_json::from_str(r#"{"text": " Hello there.", "x_groq": {"id": "req_1"}}"#).unwrap();
        assert_eq!(parsed.text, " Hello there.");

        let parsed: TranscriptionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.text.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_a_provider_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::artifact::ArtifactStore::new(dir.path());
        let handle = store.store(b"audio", Some("audio/webm")).await.unwrap();

        // a port that was just free and is no longer bound
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);
        let gateway = GroqTranscriptions::new(reqwest::Client::new(), base_url, "whisper-large-v3");
        let result = gateway.transcribe(&handle).await;
        assert!(matches!(result, Err(ProviderError::Transport(_))));

        store.delete(handle).await;
    }
}
