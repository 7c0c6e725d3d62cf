//! # Voice Relay
//!
//! Request relay pipeline between a voice client and two external providers:
//! a speech-to-text service and a streaming text-generation service.
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **error**: Custom error types and HTTP error responses
//! - **state**: Shared application state, provider handles and metrics
//! - **artifact**: Temporary storage for uploaded audio
//! - **providers**: Transcription and completion provider clients
//! - **conversation**: Message schema and context window construction
//! - **relay**: Forwards provider fragments as event-stream frames
//! - **sse**: Buffered event-stream frame codec shared by server and client
//! - **handlers**, **health**, **middleware**: The HTTP surface
//! - **client**: Conversation store, stream receiver and session state machine

pub mod artifact;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod providers;
pub mod relay;
pub mod sse;
pub mod state;
