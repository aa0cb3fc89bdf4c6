use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, ByteStream, ChatBackend};
use crate::models::{estimate_tokens, Message, Role};
use crate::services::frame_decoder::{parse_delta, Frame, FrameDecoder};
use crate::state::ChatStore;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Prompt is empty")]
    EmptyPrompt,
    #[error("A response is already streaming in this session")]
    StreamInProgress,
    #[error("Conversation {0} is not the loaded conversation")]
    ConversationNotLoaded(String),
    #[error("Failed to start stream: {0}")]
    StreamStart(#[source] ApiError),
    #[error("Stream failed: {0}")]
    Stream(#[source] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The backend closed the body. `reconciled` is false when the follow-up
    /// fetch failed and the placeholder was left in place.
    Completed { reconciled: bool },
    /// Stopped by the user; the partial text stays visible.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub content: String,
    pub output_tokens: u64,
    pub malformed_frames: usize,
    pub end: StreamEnd,
}

#[derive(Debug, Default)]
struct Accumulated {
    content: String,
    tokens: u64,
    malformed_frames: usize,
    cancelled: bool,
}

/// Drives one "send prompt, stream the reply" cycle at a time against the
/// conversation currently loaded in the [`ChatStore`].
pub struct StreamingChatSession {
    backend: Arc<dyn ChatBackend>,
    store: Arc<ChatStore>,
    active: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Marks the session busy for the lifetime of one `send`. If the `send`
/// future is dropped while the store is flagged as streaming, the flag is
/// cleared here and whatever text arrived stays, as with a stop.
struct ActiveStream<'a> {
    session: &'a StreamingChatSession,
    store_streaming: bool,
}

impl ActiveStream<'_> {
    fn set_store_streaming(&mut self, is_streaming: bool) {
        self.session.store.set_streaming(is_streaming);
        self.store_streaming = is_streaming;
    }
}

impl Drop for ActiveStream<'_> {
    fn drop(&mut self) {
        if self.store_streaming {
            warn!("Stream dropped before it finished; clearing the streaming flag");
            self.session.store.set_streaming(false);
        }
        self.session.cancel_slot().take();
        self.session.active.store(false, Ordering::Release);
    }
}

impl StreamingChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<ChatStore>) -> Self {
        Self {
            backend,
            store,
            active: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn is_streaming(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Requests cooperative cancellation of the in-flight send. Returns
    /// whether there was one to cancel.
    pub fn stop(&self) -> bool {
        match self.cancel_slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<(ActiveStream<'_>, CancellationToken), SessionError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::StreamInProgress)?;
        let token = CancellationToken::new();
        *self.cancel_slot() = Some(token.clone());
        let active = ActiveStream {
            session: self,
            store_streaming: false,
        };
        Ok((active, token))
    }

    pub async fn send(
        &self,
        conversation_id: &str,
        prompt: &str,
    ) -> Result<StreamOutcome, SessionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let (mut active, cancel) = self.begin()?;
        if !self.store.is_current(conversation_id) {
            return Err(SessionError::ConversationNotLoaded(
                conversation_id.to_string(),
            ));
        }

        let prompt_tokens = estimate_tokens(prompt);
        let user_message = Message::local(conversation_id, Role::User, prompt, prompt_tokens);
        let user_message_id = user_message.id.clone();
        self.store.append_message(conversation_id, user_message);
        active.set_store_streaming(true);

        let stream = match self.backend.open_message_stream(conversation_id, prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open stream for conversation {}: {}", conversation_id, e);
                self.abandon(&mut active, conversation_id, &[&user_message_id], &e);
                return Err(SessionError::StreamStart(e));
            }
        };

        let placeholder = Message::local(conversation_id, Role::Assistant, "", prompt_tokens);
        let placeholder_id = placeholder.id.clone();
        self.store.append_message(conversation_id, placeholder);

        let accumulated = match self
            .consume(conversation_id, &placeholder_id, stream, &cancel)
            .await
        {
            Ok(accumulated) => accumulated,
            Err(e) => {
                error!("Stream for conversation {} failed: {}", conversation_id, e);
                self.abandon(
                    &mut active,
                    conversation_id,
                    &[&user_message_id, &placeholder_id],
                    &e,
                );
                return Err(SessionError::Stream(e));
            }
        };

        active.set_store_streaming(false);

        let end = if accumulated.cancelled {
            info!(
                "Stream for conversation {} cancelled after {} tokens",
                conversation_id, accumulated.tokens
            );
            self.store.persist().await;
            StreamEnd::Cancelled
        } else {
            let reconciled = match self.store.reconcile(conversation_id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Reconciliation for conversation {} failed: {}", conversation_id, e);
                    self.store.persist().await;
                    false
                }
            };
            info!(
                "Stream for conversation {} completed ({} tokens, reconciled: {})",
                conversation_id, accumulated.tokens, reconciled
            );
            StreamEnd::Completed { reconciled }
        };

        Ok(StreamOutcome {
            output_tokens: accumulated.tokens,
            content: accumulated.content,
            malformed_frames: accumulated.malformed_frames,
            end,
        })
    }

    async fn consume(
        &self,
        conversation_id: &str,
        placeholder_id: &str,
        mut stream: ByteStream,
        cancel: &CancellationToken,
    ) -> Result<Accumulated, ApiError> {
        let mut decoder = FrameDecoder::new();
        let mut accumulated = Accumulated::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    accumulated.cancelled = true;
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for frame in decoder.feed(&chunk) {
                        if cancel.is_cancelled() {
                            accumulated.cancelled = true;
                            return Ok(accumulated);
                        }
                        self.apply(conversation_id, placeholder_id, frame, &mut accumulated);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if let Some(frame) = decoder.finish() {
                        self.apply(conversation_id, placeholder_id, frame, &mut accumulated);
                    }
                    break;
                }
            }
        }

        Ok(accumulated)
    }

    /// One publish per delta: the placeholder carries the full text so far and
    /// its UTF-16 length as `output_tokens`.
    fn apply(
        &self,
        conversation_id: &str,
        placeholder_id: &str,
        frame: Frame,
        accumulated: &mut Accumulated,
    ) {
        let payload = match frame {
            Frame::Done => {
                debug!("Received [DONE] for conversation {}", conversation_id);
                return;
            }
            Frame::Payload(payload) => payload,
        };

        match parse_delta(&payload) {
            Ok(Some(delta)) => {
                accumulated.tokens += estimate_tokens(&delta);
                accumulated.content.push_str(&delta);
                self.store.update_message_content(
                    conversation_id,
                    placeholder_id,
                    &accumulated.content,
                    accumulated.tokens,
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Dropping stream frame: {}", e);
                accumulated.malformed_frames += 1;
            }
        }
    }

    /// Fatal path: the optimistic messages are rolled back and the error surfaced.
    fn abandon(
        &self,
        active: &mut ActiveStream<'_>,
        conversation_id: &str,
        message_ids: &[&str],
        error: &ApiError,
    ) {
        self.store.remove_messages(conversation_id, message_ids);
        active.set_store_streaming(false);
        self.store
            .set_error(Some(error.detail_or("Failed to send message")));
    }
}
