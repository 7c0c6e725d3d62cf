//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT) and the provider credential (GROQ_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_PROVIDERS__COMPLETION_MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Environment variable carrying the provider credential.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, providers, uploads)
/// keeps each concern readable on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub uploads: UploadConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// External provider settings.
///
/// Both providers speak the OpenAI-compatible HTTP dialect, so a single base
/// URL and credential serve the transcription and the completion endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Base URL, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,
    /// Bearer credential. Never logged or returned by any endpoint.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Speech-to-text model name
    pub transcription_model: String,
    /// Text-generation model name
    pub completion_model: String,
}

/// Upload handling for `/stt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory for temporary audio artifacts; the system temp dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Largest accepted audio upload in bytes
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            providers: ProvidersConfig {
                base_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: String::new(),
                transcription_model: "whisper-large-v3".to_string(),
                completion_model: "llama-3.1-8b-instant".to_string(),
            },
            uploads: UploadConfig {
                dir: None,
                max_upload_bytes: 25 * 1024 * 1024, // provider-side upload ceiling
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and GROQ_API_KEY
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: Override server port
    /// - `APP_PROVIDERS__COMPLETION_MODEL=llama-3.3-70b-versatile`: Override the model
    /// - `APP_UPLOADS__DIR=/var/tmp/voice-relay`: Override the upload directory
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections because field names contain `_`
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var(API_KEY_ENV) {
            settings = settings.set_override("providers.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// A missing credential is not an error here: the server still starts and
    /// the provider answers every call with an authorization failure, which
    /// surfaces as a regular provider error.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.providers.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Provider base URL cannot be empty"));
        }

        if self.uploads.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Directory where temporary audio artifacts are written.
    pub fn upload_dir(&self) -> PathBuf {
        match &self.uploads.dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => env::temp_dir().join("voice-relay"),
        }
    }

    /// Whether a provider credential has been supplied.
    pub fn has_api_key(&self) -> bool {
        !self.providers.api_key.trim().is_empty()
    }
}
