use crate::conversation::{CompletionRequest, ContextWindow};
use crate::error::{AppError, AppResult};
use crate::relay::CompletionRelay;
use crate::state::AppState;
use actix_web::http::header::CACHE_CONTROL;
use actix_web::{web, HttpResponse};
use std::time::Instant;
use tracing::{debug, error, info};

pub const PROMPT_REQUIRED: &str = "Prompt is required.";
pub const COMPLETION_FAILED: &str = "Failed to get response from Groq API.";

/// Relay one streaming completion.
///
/// ## Endpoint: `POST /groq`
///
/// ## Request:
/// ```json
/// {
///   "history": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}],
///   "prompt": "tell me a joke",
///   "outputStyle": "short"
/// }
/// ```
///
/// ## Response:
/// `text/event-stream`, one `data: {"content":"..."}` frame per provider
/// fragment, closed when the provider finishes.
///
/// The provider call is made before the response starts, so a provider that
/// fails straight away still gets a JSON 500. After that the status is
/// committed and a provider failure only shortens the stream.
pub async fn stream_completion(
    state: web::Data<AppState>,
    web::Json(request): web::Json<CompletionRequest>,
) -> AppResult<HttpResponse> {
    let start_time = Instant::now();

    if request.prompt.trim().is_empty() {
        return Err(AppError::ValidationError(PROMPT_REQUIRED.to_string()));
    }

    let style = request.style();
    let window = ContextWindow::from_request(request);
    debug!(
        style = %style,
        prior_messages = window.prior_messages.len(),
        model = state.completions.model(),
        "Relaying completion"
    );

    let relay = CompletionRelay::open(state.completions.as_ref(), &window)
        .await
        .map_err(|e| {
            error!(error = %e, "Completion provider failed before streaming");
            AppError::Provider(COMPLETION_FAILED.to_string())
        })?;

    info!(
        first_fragment_ms = start_time.elapsed().as_millis() as u64,
        empty = relay.is_empty(),
        "Completion stream started"
    );

    state.stream_started();
    let stream_state = state.clone();
    let frames = relay.into_frames(move |outcome| {
        info!(
            ?outcome,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Completion stream closed"
        );
        stream_state.stream_finished(outcome);
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(frames))
}
