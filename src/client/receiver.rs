//! Reassembles the `/groq` event stream into the trailing assistant message.

use super::store::{ConversationStore, Message};
use super::{ClientError, COMPLETION_APOLOGY};
use crate::conversation::Role;
use crate::sse::{data_payload, FrameDecoder, StreamFrame};
use futures_util::stream::{Stream, StreamExt};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct StreamReceiver {
    decoder: FrameDecoder,
    frames: usize,
}

impl StreamReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames applied so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Apply one read. Returns whether the store changed.
    pub fn feed(&mut self, chunk: &[u8], store: &mut ConversationStore) -> Result<bool, ClientError> {
        self.decoder.push(chunk);
        let mut changed = false;

        while let Some(frame) = self.decoder.next_frame() {
            let Some(data) = data_payload(&frame?) else {
                continue;
            };
            let frame: StreamFrame = serde_json::from_str(&data)?;
            self.frames += 1;
            if !frame.content.is_empty() {
                store.append(Role::Assistant, &frame.content, true);
                changed = true;
            }
        }

        Ok(changed)
    }

    /// End of stream: the reply is complete.
    pub fn finish(&mut self, store: &mut ConversationStore) {
        if self.decoder.pending_len() > 0 {
            debug!(bytes = self.decoder.pending_len(), "Discarding incomplete trailing frame");
        }
        store.settle_reply();
    }

    /// Read a whole response body into the store.
    ///
    /// `on_update` sees the messages after every change. On a transport or
    /// parse error the reply is replaced with an apology and the error is
    /// returned; in every case nothing is left streaming.
    pub async fn consume<S, B, E>(
        &mut self,
        body: S,
        store: &mut ConversationStore,
        mut on_update: impl FnMut(&[Message]),
    ) -> Result<(), ClientError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<ClientError>,
    {
        futures_util::pin_mut!(body);

        while let Some(chunk) = body.next().await {
            let applied = chunk.map_err(Into::into).and_then(|bytes| self.feed(bytes.as_ref(), store));
            match applied {
                Ok(true) => on_update(store.messages()),
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, frames = self.frames, "Reply stream failed");
                    store.fail_reply(COMPLETION_APOLOGY);
                    on_update(store.messages());
                    return Err(e);
                }
            }
        }

        self.finish(store);
        on_update(store.messages());
        Ok(())
    }
}
