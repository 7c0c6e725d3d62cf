//! Streaming chat-completion client.
//!
//! The upstream answer is itself an event stream of `chat.completion.chunk`
//! objects terminated by `data: [DONE]`. It is decoded with the same buffered
//! [`FrameDecoder`] the client uses for the relay stream, and only the
//! `choices[0].delta.content` text is passed on.

use super::{check_status, endpoint, ProviderError};
use crate::conversation::ChatMessage;
use crate::sse::{data_payload, FrameDecoder};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered text fragments of one completion.
///
/// Dropping the stream drops the underlying HTTP response, which aborts the
/// provider call.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

/// Opens one streaming completion per call.
///
/// An `Err` from `stream_completion` means nothing was produced; errors inside
/// the stream mean the completion broke off after it started.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn stream_completion(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ProviderError>;

    /// Model identifier, reported by the health endpoint.
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChatCompletionChunk {
    fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}

/// OpenAI-compatible `/chat/completions` client with `stream: true`.
#[derive(Debug, Clone)]
pub struct GroqCompletions {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GroqCompletions {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl CompletionProvider for GroqCompletions {
    async fn stream_completion(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ProviderError> {
        let url = endpoint(&self.base_url, "chat/completions");
        debug!(url = %url, messages = messages.len(), model = %self.model, "Opening completion stream");

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        Ok(decode_chunks(response.bytes_stream()).boxed())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Decode an upstream event stream into content fragments.
fn decode_chunks<S, B>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        let mut decoder = FrameDecoder::new();
        futures_util::pin_mut!(bytes);

        'read: while let Some(chunk) = bytes.next().await {
            decoder.push(chunk?.as_ref());

            while let Some(frame) = decoder.next_frame() {
                let frame = frame?;
                let Some(data) = data_payload(&frame) else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    break 'read;
                }

                let chunk: ChatCompletionChunk =
                    serde_json::from_str(&data).map_err(|e| ProviderError::Decode(e.to_string()))?;
                if let Some(content) = chunk.into_content() {
                    yield content;
                }
            }
        }

        if decoder.pending_len() > 0 {
            debug!(bytes = decoder.pending_len(), "Discarding incomplete trailing upstream frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
            })
        )
    }

    async fn collect(reads: Vec<Vec<u8>>) -> Vec<Result<String, ProviderError>> {
        let bytes = stream::iter(reads.into_iter().map(Ok::<_, reqwest::Error>));
        decode_chunks(bytes).collect().await
    }

    #[tokio::test]
    async fn test_decodes_fragments_until_done() {
        let body = format!(
            "data: {}\n\n{}{}data: [DONE]\n\n{}",
            r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            chunk("Hi"),
            chunk(" there"),
            chunk("ignored after done"),
        );

        let fragments: Vec<String> = collect(vec![body.into_bytes()])
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["Hi", " there"]);
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let body = format!("{}{}data: [DONE]\n\n", chunk("Hel"), chunk("lo"));
        let reads: Vec<Vec<u8>> = body.as_bytes().chunks(7).map(|c| c.to_vec()).collect();

        let fragments: Vec<String> = collect(reads).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_malformed_chunk_ends_stream_with_error() {
        let body = format!("{}data: {{not json\n\n{}", chunk("a"), chunk("b"));
        let items = collect(vec![body.into_bytes()]).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(matches!(items[1], Err(ProviderError::Decode(_))));
    }

    #[tokio::test]
    async fn test_stream_without_done_marker_ends_quietly() {
        let items = collect(vec![chunk("only").into_bytes(), b"data: {\"choi".to_vec()]).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "only");
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "llama-3.1-8b-instant",
            messages: vec![ChatMessage {
                role: crate::conversation::ProviderRole::System,
                content: "be brief".to_string(),
            }],
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
    }
}
