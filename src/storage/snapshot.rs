use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{read_json, write_json, StorageError};
use crate::models::{ConversationDetail, ConversationSummary, User};

/// Persisted slice of the chat store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub conversations: Vec<ConversationSummary>,
    pub current_conversation: Option<ConversationDetail>,
}

/// Persisted slice of the auth session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
}

/// Reads and writes the store slices kept between runs.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    const CHAT_FILE: &'static str = "chat-state.json";
    const AUTH_FILE: &'static str = "auth-state.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load_chat(&self) -> Result<Option<ChatSnapshot>, StorageError> {
        read_json(&self.dir.join(Self::CHAT_FILE)).await
    }

    pub async fn save_chat(&self, snapshot: &ChatSnapshot) -> Result<(), StorageError> {
        write_json(&self.dir.join(Self::CHAT_FILE), snapshot).await
    }

    pub async fn load_auth(&self) -> Result<Option<AuthSnapshot>, StorageError> {
        read_json(&self.dir.join(Self::AUTH_FILE)).await
    }

    pub async fn save_auth(&self, snapshot: &AuthSnapshot) -> Result<(), StorageError> {
        write_json(&self.dir.join(Self::AUTH_FILE), snapshot).await
    }
}
