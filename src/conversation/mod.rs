//! # Conversation Schema
//!
//! Message types that cross the network between the client and the relay,
//! and the messages the relay submits to the completion provider.
//!
//! History entries are validated on the way in: `role` is a closed enum, so a
//! request carrying any role other than `user` or `assistant` is rejected
//! instead of being forwarded to the provider. Extra fields on a history entry
//! (the browser client used to echo `isStreaming`) are ignored.

pub mod window;

pub use window::{ContextWindow, MAX_PRIOR_MESSAGES};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One `{role, content}` history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Selects the system preamble. `short` when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    /// Extreme brevity: at most three one-line bullets
    #[default]
    Short,
    /// Structured explanation with examples
    Long,
}

impl OutputStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStyle::Short => "short",
            OutputStyle::Long => "long",
        }
    }
}

impl fmt::Display for OutputStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(OutputStyle::Short),
            "long" => Ok(OutputStyle::Long),
            other => Err(format!("unknown output style '{}' (expected short or long)", other)),
        }
    }
}

/// Body of `POST /groq`.
///
/// `prompt` defaults to an empty string so a missing prompt and an empty one
/// are rejected by the same check in the handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub prompt: String,
    #[serde(rename = "outputStyle", default, skip_serializing_if = "Option::is_none")]
    pub output_style: Option<OutputStyle>,
}

impl CompletionRequest {
    pub fn style(&self) -> OutputStyle {
        self.output_style.unwrap_or_default()
    }
}

/// Role of a message submitted to the completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ProviderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        }
    }
}

/// A message in the provider's chat format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ProviderRole,
    pub content: String,
}
