use std::sync::Arc;
use tokio::sync::watch;

use crate::api::{ApiError, ChatBackend};
use crate::models::{ConversationDetail, ConversationSummary, Message};
use crate::storage::{ChatSnapshot, SnapshotStore, StorageError};

const DEFAULT_PAGE_SIZE: u32 = 50;

/// Everything the chat views render from.
///
/// Collections sit behind `Arc`s and are never edited in place: every change
/// builds a new value and swaps it in, so a `ChatState` a reader cloned earlier
/// keeps describing exactly what it saw.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub conversations: Arc<Vec<ConversationSummary>>,
    pub current_conversation: Option<Arc<ConversationDetail>>,
    pub is_loading: bool,
    pub is_streaming: bool,
    pub error: Option<String>,
    /// Bumped once per published change.
    pub revision: u64,
}

impl ChatState {
    pub fn current_id(&self) -> Option<&str> {
        self.current_conversation.as_deref().map(ConversationDetail::id)
    }
}

pub struct ChatStore {
    backend: Arc<dyn ChatBackend>,
    state: watch::Sender<ChatState>,
    snapshots: Option<SnapshotStore>,
    page_size: u32,
}

impl ChatStore {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            backend,
            state,
            snapshots: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every published change.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<Arc<ConversationDetail>> {
        self.state.borrow().current_conversation.clone()
    }

    pub fn is_current(&self, conversation_id: &str) -> bool {
        self.state.borrow().current_id() == Some(conversation_id)
    }

    fn update(&self, apply: impl FnOnce(&mut ChatState)) {
        self.state.send_modify(|state| {
            apply(state);
            state.revision += 1;
        });
    }

    /// Swaps in a rebuilt detail when `conversation_id` is the current one.
    fn replace_current(
        &self,
        conversation_id: &str,
        rebuild: impl FnOnce(&ConversationDetail) -> ConversationDetail,
    ) -> bool {
        self.state.send_if_modified(|state| {
            let next = match state.current_conversation.as_deref() {
                Some(current) if current.id() == conversation_id => rebuild(current),
                _ => return false,
            };
            state.current_conversation = Some(Arc::new(next));
            state.revision += 1;
            true
        })
    }

    // ==================== PERSISTENCE ====================

    /// Loads the persisted slice, if any. Returns whether something was restored.
    pub async fn restore(&self) -> Result<bool, StorageError> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(false);
        };
        let Some(snapshot) = snapshots.load_chat().await? else {
            return Ok(false);
        };

        self.update(|state| {
            state.conversations = Arc::new(snapshot.conversations);
            state.current_conversation = snapshot.current_conversation.map(Arc::new);
        });
        Ok(true)
    }

    pub async fn persist(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshot = {
            let state = self.state.borrow();
            ChatSnapshot {
                conversations: state.conversations.as_ref().clone(),
                current_conversation: state.current_conversation.as_deref().cloned(),
            }
        };
        if let Err(e) = snapshots.save_chat(&snapshot).await {
            tracing::warn!("Failed to persist chat state: {}", e);
        }
    }

    // ==================== ACTIONS ====================

    fn begin(&self) {
        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });
    }

    fn fail(&self, error: &ApiError, fallback: &str) {
        tracing::warn!("{}: {}", fallback, error);
        let message = error.detail_or(fallback);
        self.update(|state| {
            state.is_loading = false;
            state.error = Some(message);
        });
    }

    pub async fn load_conversations(&self) -> Result<(), ApiError> {
        self.begin();
        match self.backend.list_conversations(self.page_size, 0).await {
            Ok(conversations) => {
                self.update(|state| {
                    state.conversations = Arc::new(conversations);
                    state.is_loading = false;
                });
                self.persist().await;
                Ok(())
            }
            Err(e) => {
                self.fail(&e, "Failed to load conversations");
                Err(e)
            }
        }
    }

    /// Creates a conversation, puts it first in the list and makes it current.
    pub async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<ConversationSummary, ApiError> {
        self.begin();
        match self
            .backend
            .create_conversation(title.map(str::to_string))
            .await
        {
            Ok(created) => {
                let summary = created.clone();
                self.update(|state| {
                    let mut conversations = Vec::with_capacity(state.conversations.len() + 1);
                    conversations.push(summary.clone());
                    conversations.extend(state.conversations.iter().cloned());
                    state.conversations = Arc::new(conversations);
                    state.current_conversation = Some(Arc::new(ConversationDetail::empty(summary)));
                    state.is_loading = false;
                });
                self.persist().await;
                Ok(created)
            }
            Err(e) => {
                self.fail(&e, "Failed to create conversation");
                Err(e)
            }
        }
    }

    pub async fn select_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.begin();
        match self.backend.get_conversation(conversation_id).await {
            Ok(detail) => {
                self.update(|state| {
                    state.current_conversation = Some(Arc::new(detail));
                    state.is_loading = false;
                });
                self.persist().await;
                Ok(())
            }
            Err(e) => {
                self.fail(&e, "Failed to load conversation");
                Err(e)
            }
        }
    }

    /// Non-streaming send: the persisted reply is appended once it arrives.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        self.begin();
        match self.backend.send_message(conversation_id, content).await {
            Ok(response) => {
                let message = response.message;
                self.append_message(conversation_id, message.clone());
                self.update(|state| state.is_loading = false);
                self.persist().await;
                Ok(message)
            }
            Err(e) => {
                self.fail(&e, "Failed to send message");
                Err(e)
            }
        }
    }

    /// Deletes a conversation; the current pointer is cleared only if it pointed at it.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.begin();
        match self.backend.delete_conversation(conversation_id).await {
            Ok(()) => {
                self.update(|state| {
                    let remaining: Vec<ConversationSummary> = state
                        .conversations
                        .iter()
                        .filter(|c| c.id != conversation_id)
                        .cloned()
                        .collect();
                    state.conversations = Arc::new(remaining);
                    if state.current_id() == Some(conversation_id) {
                        state.current_conversation = None;
                    }
                    state.is_loading = false;
                });
                self.persist().await;
                Ok(())
            }
            Err(e) => {
                self.fail(&e, "Failed to delete conversation");
                Err(e)
            }
        }
    }

    pub fn clear_error(&self) {
        self.update(|state| state.error = None);
    }

    // ==================== STREAMING HOOKS ====================

    pub fn set_streaming(&self, is_streaming: bool) {
        self.update(|state| state.is_streaming = is_streaming);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.update(|state| state.error = error);
    }

    /// Appends to the current conversation's log; ignored for any other conversation.
    pub fn append_message(&self, conversation_id: &str, message: Message) -> bool {
        self.replace_current(conversation_id, |current| {
            let mut messages = current.messages.clone();
            messages.push(message);
            current.with_messages(messages)
        })
    }

    pub fn update_message_content(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        output_tokens: u64,
    ) -> bool {
        self.replace_current(conversation_id, |current| {
            let messages = current
                .messages
                .iter()
                .map(|m| {
                    if m.id == message_id {
                        Message {
                            content: content.to_string(),
                            output_tokens,
                            ..m.clone()
                        }
                    } else {
                        m.clone()
                    }
                })
                .collect();
            current.with_messages(messages)
        })
    }

    pub fn remove_messages(&self, conversation_id: &str, message_ids: &[&str]) -> bool {
        self.replace_current(conversation_id, |current| {
            let messages = current
                .messages
                .iter()
                .filter(|m| !message_ids.contains(&m.id.as_str()))
                .cloned()
                .collect();
            current.with_messages(messages)
        })
    }

    /// Replaces client-side approximations with the backend's record: the
    /// conversation list always, the detail only if it is still current.
    pub async fn reconcile(&self, conversation_id: &str) -> Result<(), ApiError> {
        let conversations = self
            .backend
            .list_conversations(self.page_size, 0)
            .await?;
        let detail = self.backend.get_conversation(conversation_id).await?;

        self.update(|state| {
            state.conversations = Arc::new(conversations);
            if state.current_id() == Some(conversation_id) {
                state.current_conversation = Some(Arc::new(detail));
            }
        });
        self.persist().await;
        Ok(())
    }
}
