use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, error, info};

pub const NO_AUDIO_UPLOADED: &str = "No audio file uploaded.";
pub const TRANSCRIPTION_FAILED: &str = "Failed to transcribe audio.";
pub const STORE_FAILED: &str = "Failed to store uploaded audio.";

/// Multipart form field carrying the recording.
const AUDIO_FIELD: &str = "audio";

/// The audio part of a `/stt` upload.
#[derive(Debug)]
struct AudioUpload {
    bytes: Vec<u8>,
    content_type: Option<String>,
    filename: Option<String>,
}

/// Transcribe one recorded utterance.
///
/// ## Endpoint: `POST /stt`
///
/// ## Request:
/// Multipart form data with the recording in a file field named `audio`.
///
/// ## Response:
/// ```json
/// { "text": "What's the weather like?" }
/// ```
///
/// The upload is written to a temporary artifact that the transcription
/// provider reads back. The artifact is deleted before the response is built,
/// whatever the provider answered.
pub async fn transcribe_audio(state: web::Data<AppState>, mut payload: Multipart) -> AppResult<HttpResponse> {
    let start_time = Instant::now();
    let max_bytes = state.config().uploads.max_upload_bytes;

    let upload = read_audio_field(&mut payload, max_bytes)
        .await?
        .ok_or_else(|| AppError::ValidationError(NO_AUDIO_UPLOADED.to_string()))?;

    debug!(
        size_bytes = upload.bytes.len(),
        content_type = upload.content_type.as_deref().unwrap_or("none"),
        filename = upload.filename.as_deref().unwrap_or("none"),
        "Received audio upload"
    );

    let artifact = state
        .artifacts
        .store(&upload.bytes, upload.content_type.as_deref())
        .await
        .map_err(|e| {
            error!(error = %e, dir = %state.artifacts.dir().display(), "Failed to store audio upload");
            AppError::Internal(STORE_FAILED.to_string())
        })?;
    drop(upload);

    let result = state.transcriber.transcribe(&artifact).await;

    let cleanup = state.artifacts.delete(artifact).await;
    state.record_cleanup(cleanup);

    match result {
        Ok(text) => {
            info!(
                chars = text.len(),
                model = state.transcriber.model(),
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Transcription succeeded"
            );
            Ok(HttpResponse::Ok().json(json!({ "text": text })))
        }
        Err(e) => {
            error!(error = %e, model = state.transcriber.model(), "Transcription provider failed");
            Err(AppError::Provider(TRANSCRIPTION_FAILED.to_string()))
        }
    }
}

/// Pull the `audio` field out of a multipart body, draining any other fields.
///
/// Returns `Ok(None)` when the body is not multipart, the field is missing
/// or the file is empty.
async fn read_audio_field(payload: &mut Multipart, max_bytes: usize) -> AppResult<Option<AudioUpload>> {
    let mut upload = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = match item {
            Ok(field) => field,
            Err(e) => {
                debug!(error = %e, "Unreadable multipart body");
                return Ok(None);
            }
        };

        let is_audio = field
            .content_disposition()
            .and_then(|disposition| disposition.get_name())
            .map_or(false, |name| name == AUDIO_FIELD);

        if !is_audio || upload.is_some() {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .map(|s| s.to_string());
        let content_type = field.content_type().map(|mime| mime.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::ValidationError(format!(
                    "Audio file too large (max {} bytes).",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !bytes.is_empty() {
            upload = Some(AudioUpload {
                bytes,
                content_type,
                filename,
            });
        }
    }

    Ok(upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::config::AppConfig;
    use crate::handlers::configure;
    use crate::handlers::tests::{test_state, StubTranscriber};
    use crate::relay::tests::ScriptedCompletions;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use std::sync::Arc;

    const BOUNDARY: &str = "----relayboundary7MA4YWxkTrZu0gW";

    fn multipart_body(field: &str, mime: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"recording.webm\"\r\n",
                field
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/stt")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    async fn error_message(response: actix_web::dev::ServiceResponse) -> String {
        let body: serde_json::Value = test::read_body_json(response).await;
        body["error"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn test_transcription_success_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(StubTranscriber::answering("What's the weather like?"));
        let state = test_state(transcriber.clone(), Arc::new(ScriptedCompletions::new(vec![])), dir.path());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let response = test::call_service(&app, upload_request(multipart_body("audio", "audio/webm", b"OggS-ish")).to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body, serde_json::json!({ "text": "What's the weather like?" }));

        let (path, existed) = transcriber.seen().unwrap();
        assert!(existed);
        assert_eq!(path.extension().unwrap(), "webm");
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_provider_failure_still_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(StubTranscriber::failing());
        let state = test_state(transcriber.clone(), Arc::new(ScriptedCompletions::new(vec![])), dir.path());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let response = test::call_service(&app, upload_request(multipart_body("audio", "audio/wav", b"RIFF")).to_request()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_message(response).await, TRANSCRIPTION_FAILED);

        let (path, existed) = transcriber.seen().unwrap();
        assert!(existed);
        assert!(!path.exists());
        assert_eq!(state.get_metrics_snapshot().cleanup_failures, 0);
    }

    #[actix_web::test]
    async fn test_missing_audio_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(StubTranscriber::answering("unused"));
        let state = test_state(transcriber.clone(), Arc::new(ScriptedCompletions::new(vec![])), dir.path());
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let response = test::call_service(&app, upload_request(multipart_body("voice", "audio/webm", b"data")).to_request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, NO_AUDIO_UPLOADED);
        assert_eq!(transcriber.calls(), 0);
        assert!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0) == 0);
    }

    #[actix_web::test]
    async fn test_non_multipart_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(StubTranscriber::answering("unused"));
        let state = test_state(transcriber.clone(), Arc::new(ScriptedCompletions::new(vec![])), dir.path());
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let request = test::TestRequest::post()
            .uri("/stt")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{}")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, NO_AUDIO_UPLOADED);
        assert_eq!(transcriber.calls(), 0);
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(StubTranscriber::answering("unused"));
        let mut config = AppConfig::default();
        config.uploads.max_upload_bytes = 8;
        let state = web::Data::new(
            AppState::new(config, transcriber.clone(), Arc::new(ScriptedCompletions::new(vec![])))
                .with_artifact_store(ArtifactStore::new(dir.path())),
        );
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let response = test::call_service(&app, upload_request(multipart_body("audio", "audio/webm", &[0u8; 64])).to_request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(transcriber.calls(), 0);
    }

    #[actix_web::test]
    async fn test_store_failure_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let transcriber = Arc::new(StubTranscriber::answering("unused"));
        let state = test_state(transcriber.clone(), Arc::new(ScriptedCompletions::new(vec![])), &blocker);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let response = test::call_service(&app, upload_request(multipart_body("audio", "audio/webm", b"data")).to_request()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_message(response).await, STORE_FAILED);
        assert_eq!(transcriber.calls(), 0);
    }
}
