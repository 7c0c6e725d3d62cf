//! # Voice Session
//!
//! One user, one turn at a time:
//!
//! ```text
//! idle -> recording -> transcribing -> streaming -> idle
//!   \_______________ ask _______________/
//! ```
//!
//! `POST /stt` uploads and transcribes in one request, so there is no
//! separate uploading phase: `Transcribing` covers the whole round trip.
//!
//! Operations called in the wrong phase are rejected with
//! [`ClientError::InvalidPhase`] and change nothing. Every turn, successful
//! or not, ends back in `Idle`.

use super::receiver::StreamReceiver;
use super::store::{ConversationStore, Message};
use super::{transcription_apology, ClientError, COMPLETION_APOLOGY};
use crate::artifact::canonical_extension;
use crate::conversation::{CompletionRequest, ContextWindow, OutputStyle, Role};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Raw `/groq` response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// The two relay calls a session makes.
#[async_trait]
pub trait RelayBackend: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, mime: &str) -> Result<String, ClientError>;

    /// Returns the body once a 2xx status has been received.
    async fn complete(&self, request: &CompletionRequest) -> Result<ByteStream, ClientError>;
}

/// Re-render hook, called with the full message list after each change.
pub trait ConversationView: Send {
    fn render(&mut self, messages: &[Message]);

    /// Called on every phase transition, e.g. to disable the record control.
    fn phase_changed(&mut self, _phase: Phase) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    Transcribing,
    Streaming,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Recording => "recording",
            Phase::Transcribing => "transcribing",
            Phase::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered,
    /// Nothing was said or typed; no completion was requested.
    EmptyUtterance,
    TranscriptionFailed(String),
    CompletionFailed,
}

pub struct VoiceSession<B, V> {
    backend: B,
    view: V,
    store: ConversationStore,
    phase: Phase,
    style: OutputStyle,
}

impl<B: RelayBackend, V: ConversationView> VoiceSession<B, V> {
    pub fn new(backend: B, view: V) -> Self {
        Self {
            backend,
            view,
            store: ConversationStore::default(),
            phase: Phase::Idle,
            style: OutputStyle::default(),
        }
    }

    pub fn with_style(mut self, style: OutputStyle) -> Self {
        self.style = style;
        self
    }

    pub fn set_style(&mut self, style: OutputStyle) {
        self.style = style;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn start_recording(&mut self) -> Result<(), ClientError> {
        self.expect_idle("start recording")?;
        self.enter(Phase::Recording);
        Ok(())
    }

    /// Abandon a recording without uploading it.
    pub fn cancel_recording(&mut self) -> Result<(), ClientError> {
        if self.phase != Phase::Recording {
            return Err(ClientError::InvalidPhase {
                action: "cancel recording",
                phase: self.phase,
            });
        }
        self.enter(Phase::Idle);
        Ok(())
    }

    /// Upload a finished recording and, if anything was said, ask about it.
    pub async fn finish_recording(&mut self, audio: Vec<u8>, mime: &str) -> Result<TurnOutcome, ClientError> {
        if self.phase != Phase::Recording {
            return Err(ClientError::InvalidPhase {
                action: "finish recording",
                phase: self.phase,
            });
        }

        self.enter(Phase::Transcribing);
        debug!(size_bytes = audio.len(), mime, "Uploading recording");

        let text = match self.backend.transcribe(audio, mime).await {
            Ok(text) => text,
            Err(e) => {
                let reason = e.reason();
                warn!(error = %e, "Transcription failed");
                self.store.append(Role::Assistant, &transcription_apology(&reason), false);
                self.view.render(self.store.messages());
                self.enter(Phase::Idle);
                return Ok(TurnOutcome::TranscriptionFailed(reason));
            }
        };

        let text = text.trim();
        if text.is_empty() {
            info!("Empty transcript, nothing to ask");
            self.enter(Phase::Idle);
            return Ok(TurnOutcome::EmptyUtterance);
        }

        Ok(self.run_turn(text.to_string()).await)
    }

    /// Text-only turn.
    pub async fn ask(&mut self, prompt: &str) -> Result<TurnOutcome, ClientError> {
        self.expect_idle("ask")?;

        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(TurnOutcome::EmptyUtterance);
        }
        Ok(self.run_turn(prompt.to_string()).await)
    }

    async fn run_turn(&mut self, prompt: String) -> TurnOutcome {
        self.enter(Phase::Streaming);

        self.store.append(Role::User, &prompt, false);
        self.store.begin_reply();
        self.view.render(self.store.messages());

        let window = ContextWindow::build(&self.store.history(), prompt, self.style);
        let request = window.to_request(self.style);

        let outcome = match self.backend.complete(&request).await {
            Ok(body) => {
                let mut receiver = StreamReceiver::new();
                let view = &mut self.view;
                match receiver
                    .consume(body, &mut self.store, |messages| view.render(messages))
                    .await
                {
                    Ok(()) => {
                        debug!(frames = receiver.frames(), "Reply complete");
                        TurnOutcome::Answered
                    }
                    Err(_) => TurnOutcome::CompletionFailed,
                }
            }
            Err(e) => {
                warn!(error = %e, "Completion request failed");
                self.store.fail_reply(COMPLETION_APOLOGY);
                self.view.render(self.store.messages());
                TurnOutcome::CompletionFailed
            }
        };

        self.enter(Phase::Idle);
        outcome
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.view.phase_changed(phase);
    }

    fn expect_idle(&self, action: &'static str) -> Result<(), ClientError> {
        if self.phase == Phase::Idle {
            Ok(())
        } else {
            Err(ClientError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptBody {
    #[serde(default)]
    text: String,
}

/// `RelayBackend` over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("voice-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Turn a non-2xx relay response into `ClientError::Server`, keeping the
/// relay's `{"error": ...}` message when there is one.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RelayBackend for HttpBackend {
    async fn transcribe(&self, audio: Vec<u8>, mime: &str) -> Result<String, ClientError> {
        let part = Part::bytes(audio)
            .file_name(format!("recording.{}", canonical_extension(Some(mime))))
            .mime_str(mime)?;
        let form = Form::new().part("audio", part);

        let response = self.client.post(self.url("stt")).multipart(form).send().await?;
        let response = check_status(response).await?;
        let body: TranscriptBody = response.json().await?;
        Ok(body.text)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ByteStream, ClientError> {
        let response = self.client.post(self.url("groq")).json(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.bytes_stream().map(|chunk| chunk.map_err(ClientError::from)).boxed())
    }
}
