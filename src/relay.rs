//! # Completion Relay
//!
//! Opens one streaming provider call per request and turns its fragments into
//! event-stream frames written onto a single HTTP response.
//!
//! ## Failure handling:
//! - The provider call is opened and its **first non-empty fragment awaited
//!   before any byte is written**. A failure up to that point is returned as an
//!   error and the handler answers with a JSON 500.
//! - Once the first frame is out, the status line and headers are committed. A
//!   later provider failure ends the body after the last complete frame; no
//!   error marker is written, the missing remainder is the only signal.
//! - When the client goes away, actix drops the response body stream. That
//!   drops the provider stream and with it the upstream HTTP call.
//!
//! Every relay reports exactly one [`RelayOutcome`] when its stream finishes
//! or is dropped.

use crate::conversation::ContextWindow;
use crate::providers::{CompletionProvider, FragmentStream, ProviderError};
use crate::sse::encode_frame;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tracing::{debug, info, warn};

/// How a relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The provider finished and every fragment was forwarded.
    Completed { frames: usize },
    /// The provider failed after streaming began.
    Truncated { frames: usize },
    /// The response body was dropped before the provider finished.
    Cancelled { frames: usize },
}

type OutcomeCallback = Box<dyn FnOnce(RelayOutcome) + Send>;

/// Reports the outcome once, falling back to `Cancelled` when dropped early.
struct OutcomeGuard {
    frames: usize,
    on_close: Option<OutcomeCallback>,
}

impl OutcomeGuard {
    fn finish(&mut self, outcome: RelayOutcome) {
        if let Some(on_close) = self.on_close.take() {
            on_close(outcome);
        }
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if self.on_close.is_some() {
            info!(frames = self.frames, "Client disconnected, cancelling provider stream");
            self.finish(RelayOutcome::Cancelled { frames: self.frames });
        }
    }
}

/// A completion whose first fragment has already arrived (or which produced
/// nothing at all).
pub struct CompletionRelay {
    first: Option<String>,
    rest: FragmentStream,
}

impl CompletionRelay {
    /// Open the provider stream for a context window.
    ///
    /// Returns an error if the call fails before a first fragment exists. A
    /// completion with zero fragments is not an error.
    pub async fn open(provider: &dyn CompletionProvider, window: &ContextWindow) -> Result<Self, ProviderError> {
        let mut rest = provider.stream_completion(window.messages()).await?;

        let first = loop {
            match rest.next().await {
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => break Some(fragment),
                Some(Err(e)) => return Err(e),
                None => break None,
            }
        };

        debug!(has_content = first.is_some(), "Completion stream opened");
        Ok(Self { first, rest })
    }

    /// Whether the provider produced no content at all.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Frame stream for the response body.
    ///
    /// One frame is produced per fragment and the next fragment is only pulled
    /// once the previous frame has been taken by the writer.
    pub fn into_frames<F>(self, on_close: F) -> impl Stream<Item = Result<Bytes, Infallible>>
    where
        F: FnOnce(RelayOutcome) + Send + 'static,
    {
        let Self { first, mut rest } = self;
        let mut guard = OutcomeGuard {
            frames: 0,
            on_close: Some(Box::new(on_close)),
        };

        async_stream::stream! {
            let Some(first) = first else {
                guard.finish(RelayOutcome::Completed { frames: 0 });
                return;
            };

            guard.frames += 1;
            yield Ok(encode_frame(&first));

            while let Some(item) = rest.next().await {
                match item {
                    Ok(fragment) if fragment.is_empty() => continue,
                    Ok(fragment) => {
                        guard.frames += 1;
                        yield Ok(encode_frame(&fragment));
                    }
                    Err(e) => {
                        warn!(error = %e, frames = guard.frames, "Provider failed mid-stream, ending response");
                        let frames = guard.frames;
                        guard.finish(RelayOutcome::Truncated { frames });
                        return;
                    }
                }
            }

            let frames = guard.frames;
            guard.finish(RelayOutcome::Completed { frames });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::conversation::{ChatMessage, OutputStyle};
    use async_trait::async_trait;
    use futures_util::stream;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// One scripted provider step.
    #[derive(Debug, Clone)]
    pub enum Step {
        Fragment(&'static str),
        Fail,
    }

    /// Completion provider replaying a script.
    pub struct ScriptedCompletions {
        pub script: Vec<Step>,
        pub fail_on_open: bool,
        pub calls: AtomicUsize,
        pub last_messages: Mutex<Vec<ChatMessage>>,
        pub dropped: Arc<AtomicBool>,
    }

    impl ScriptedCompletions {
        pub fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                fail_on_open: false,
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn failing_on_open() -> Self {
            Self {
                fail_on_open: true,
                ..Self::new(vec![])
            }
        }
    }

    /// Sets a flag when the provider stream is dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletions {
        async fn stream_completion(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock() = messages;
            if self.fail_on_open {
                return Err(ProviderError::Status {
                    status: 401,
                    body: "invalid api key".to_string(),
                });
            }

            let flag = DropFlag(self.dropped.clone());
            let items = self.script.clone().into_iter().map(|step| match step {
                Step::Fragment(text) => Ok(text.to_string()),
                Step::Fail => Err(ProviderError::Decode("upstream reset".to_string())),
            });
            let stream = stream::iter(items).map(move |item| {
                let _keep = &flag;
                item
            });
            Ok(stream.boxed())
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn window() -> ContextWindow {
        ContextWindow::build(&[], "hello", OutputStyle::Short)
    }

    fn recorder() -> (Arc<Mutex<Vec<RelayOutcome>>>, impl FnOnce(RelayOutcome) + Send + 'static) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        (outcomes, move |outcome| sink.lock().push(outcome))
    }

    async fn body(relay: CompletionRelay, on_close: impl FnOnce(RelayOutcome) + Send + 'static) -> String {
        let frames: Vec<Bytes> = relay
            .into_frames(on_close)
            .map(|frame| match frame {
                Ok(bytes) => bytes,
                Err(never) => match never {},
            })
            .collect()
            .await;
        String::from_utf8(frames.concat()).unwrap()
    }

    #[tokio::test]
    async fn test_frames_concatenate_to_full_text() {
        let provider = ScriptedCompletions::new(vec![
            Step::Fragment("The "),
            Step::Fragment(""),
            Step::Fragment("quick "),
            Step::Fragment("fox"),
        ]);
        let relay = CompletionRelay::open(&provider, &window()).await.unwrap();
        let (outcomes, on_close) = recorder();

        let body = body(relay, on_close).await;
        assert_eq!(
            body,
            "data: {\"content\":\"The \"}\n\ndata: {\"content\":\"quick \"}\n\ndata: {\"content\":\"fox\"}\n\n"
        );
        assert_eq!(*outcomes.lock(), vec![RelayOutcome::Completed { frames: 3 }]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_before_first_fragment_is_an_error() {
        let provider = ScriptedCompletions::new(vec![Step::Fragment(""), Step::Fail]);
        assert!(CompletionRelay::open(&provider, &window()).await.is_err());

        let provider = ScriptedCompletions::failing_on_open();
        assert!(matches!(
            CompletionRelay::open(&provider, &window()).await,
            Err(ProviderError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_mid_stream_truncates_cleanly() {
        let provider = ScriptedCompletions::new(vec![Step::Fragment("partial"), Step::Fail, Step::Fragment("never")]);
        let relay = CompletionRelay::open(&provider, &window()).await.unwrap();
        let (outcomes, on_close) = recorder();

        let body = body(relay, on_close).await;
        assert_eq!(body, "data: {\"content\":\"partial\"}\n\n");
        assert_eq!(*outcomes.lock(), vec![RelayOutcome::Truncated { frames: 1 }]);
    }

    #[tokio::test]
    async fn test_zero_fragments_is_an_empty_stream() {
        let provider = ScriptedCompletions::new(vec![]);
        let relay = CompletionRelay::open(&provider, &window()).await.unwrap();
        assert!(relay.is_empty());
        let (outcomes, on_close) = recorder();

        assert_eq!(body(relay, on_close).await, "");
        assert_eq!(*outcomes.lock(), vec![RelayOutcome::Completed { frames: 0 }]);
    }

    #[tokio::test]
    async fn test_dropping_body_cancels_provider_stream() {
        let provider = ScriptedCompletions::new(vec![Step::Fragment("one"), Step::Fragment("two"), Step::Fragment("three")]);
        let relay = CompletionRelay::open(&provider, &window()).await.unwrap();
        let (outcomes, on_close) = recorder();

        let mut frames = Box::pin(relay.into_frames(on_close));
        assert!(frames.next().await.is_some());
        assert!(!provider.dropped.load(Ordering::SeqCst));

        // the client disconnects: actix drops the body
        drop(frames);

        assert!(provider.dropped.load(Ordering::SeqCst));
        assert_eq!(*outcomes.lock(), vec![RelayOutcome::Cancelled { frames: 1 }]);
    }

    #[tokio::test]
    async fn test_provider_receives_window_messages() {
        let provider = ScriptedCompletions::new(vec![Step::Fragment("x")]);
        let window = window();
        CompletionRelay::open(&provider, &window).await.unwrap();
        assert_eq!(*provider.last_messages.lock(), window.messages());
    }
}
