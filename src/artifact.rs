//! # Temporary Audio Artifacts
//!
//! Each `/stt` request persists its upload as one file so the transcription
//! provider can read it back, and removes that file before the response is
//! sent.
//!
//! ## Lifecycle:
//! 1. **store**: bytes are written under a staging name, then renamed to
//!    `<uuid>.<ext>` where `ext` is derived from the declared MIME type
//! 2. **transcribe**: the provider reads the file through the handle
//! 3. **delete**: the file is removed; a file that is already gone counts as removed
//!
//! ## Exit paths:
//! `delete` consumes the handle, so it can run at most once. If the handle is
//! dropped without reaching `delete` (the request future is dropped when the
//! client disconnects mid-upload), `Drop` removes the file synchronously.

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Extension used when the declared type is missing or not recognised.
pub const DEFAULT_EXTENSION: &str = "webm";

/// Map a declared MIME type to an extension the provider's format sniffing accepts.
///
/// Only the essence of the type is considered, so `audio/webm;codecs=opus`
/// maps like `audio/webm`. The upload's file name is never consulted.
pub fn canonical_extension(declared_mime: Option<&str>) -> &'static str {
    let essence = declared_mime
        .and_then(|mime| mime.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match essence.as_str() {
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/flac" | "audio/x-flac" => "flac",
        _ => DEFAULT_EXTENSION,
    }
}

/// MIME type matching a canonical extension, used when re-uploading the artifact.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        _ => "audio/webm",
    }
}

/// What happened when an artifact was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    AlreadyAbsent,
    /// Removal failed; the error has been logged and is never surfaced
    Failed,
}

/// One stored upload, exclusively owned by the request that created it.
#[derive(Debug)]
pub struct ArtifactHandle {
    path: PathBuf,
    canonical_extension: &'static str,
    created_at: DateTime<Utc>,
    size_bytes: usize,
    released: bool,
}

impl ArtifactHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn canonical_extension(&self) -> &'static str {
        self.canonical_extension
    }

    pub fn mime_type(&self) -> &'static str {
        mime_for_extension(self.canonical_extension)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// File name presented to the provider.
    pub fn file_name(&self) -> String {
        format!("audio.{}", self.canonical_extension)
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned audio artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove abandoned audio artifact"
            ),
        }
    }
}

/// Writes uploads into a single directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an upload and return its handle.
    ///
    /// Any I/O failure is returned to the caller, which fails the request;
    /// nothing is retried and no partial file is left behind.
    pub async fn store(&self, bytes: &[u8], declared_mime: Option<&str>) -> std::io::Result<ArtifactHandle> {
        self.store_as(Uuid::new_v4(), bytes, declared_mime).await
    }

    async fn store_as(&self, id: Uuid, bytes: &[u8], declared_mime: Option<&str>) -> std::io::Result<ArtifactHandle> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let extension = canonical_extension(declared_mime);
        let staging = self.dir.join(format!("{}.upload", id));
        let path = self.dir.join(format!("{}.{}", id, extension));

        if let Err(e) = tokio::fs::write(&staging, bytes).await {
            remove_quietly(&staging).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            remove_quietly(&staging).await;
            return Err(e);
        }

        debug!(
            path = %path.display(),
            size_bytes = bytes.len(),
            declared_mime = declared_mime.unwrap_or("none"),
            "Stored audio artifact"
        );

        Ok(ArtifactHandle {
            path,
            canonical_extension: extension,
            created_at: Utc::now(),
            size_bytes: bytes.len(),
            released: false,
        })
    }

    /// Remove an artifact. Never fails; problems are logged and reported in
    /// the returned outcome.
    pub async fn delete(&self, mut handle: ArtifactHandle) -> CleanupOutcome {
        let outcome = match tokio::fs::remove_file(&handle.path).await {
            Ok(()) => CleanupOutcome::Removed,
            Err(e) if e.kind() == ErrorKind::NotFound => CleanupOutcome::AlreadyAbsent,
            Err(e) => {
                warn!(
                    path = %handle.path.display(),
                    error = %e,
                    "Failed to delete temporary audio artifact"
                );
                CleanupOutcome::Failed
            }
        };
        handle.released = true;

        let lifetime_ms = (Utc::now() - handle.created_at).num_milliseconds();
        debug!(path = %handle.path.display(), ?outcome, lifetime_ms, "Released audio artifact");
        outcome
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}
