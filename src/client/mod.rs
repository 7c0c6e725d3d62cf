//! # Voice Client
//!
//! The consuming side of the relay: a conversation store, a receiver that
//! turns the `/groq` event stream back into message text, and a session
//! state machine that drives one spoken or typed turn at a time.

pub mod receiver;
pub mod session;
pub mod store;

pub use receiver::StreamReceiver;
pub use session::{ConversationView, HttpBackend, Phase, RelayBackend, TurnOutcome, VoiceSession};
pub use store::{ConversationStore, Message};

use crate::sse::FrameError;
use thiserror::Error;

/// Shown in place of the reply when a completion could not be read.
pub const COMPLETION_APOLOGY: &str = "Sorry, I had trouble getting a response.";

/// Assistant message appended when an utterance could not be transcribed.
pub fn transcription_apology(reason: &str) -> String {
    format!("Sorry, I had trouble transcribing that. ({})", reason)
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to relay failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay responded with status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("cannot {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error("malformed stream frame: {0}")]
    Frame(#[from] FrameError),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ClientError {
    /// Short reason shown to the user; the relay's own message when it sent one.
    pub fn reason(&self) -> String {
        match self {
            ClientError::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
