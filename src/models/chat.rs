use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::timestamp;

/// Prefix carried by ids the client invents before the backend has persisted a message.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Token estimate for locally built messages: the UTF-16 length of the text,
/// which is what the backend's own accounting counts.
pub fn estimate_tokens(text: &str) -> u64 {
    text.encode_utf16().count() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Entry in the conversation list. Only `title` and `updated_at` ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a message that exists only in client memory until the backend
    /// hands back the authoritative copy.
    pub fn local(conversation_id: &str, role: Role, content: &str, input_tokens: u64) -> Self {
        let kind = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        Self {
            id: format!("{}{}-{}", LOCAL_ID_PREFIX, kind, Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            input_tokens,
            output_tokens: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
}

impl TokenStats {
    pub fn from_messages(messages: &[Message]) -> Self {
        let input_tokens: u64 = messages.iter().map(|m| m.input_tokens).sum();
        let output_tokens: u64 = messages.iter().map(|m| m.output_tokens).sum();
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            message_count: messages.len() as u64,
        }
    }
}

/// A conversation together with its append-only message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub token_stats: TokenStats,
}

impl ConversationDetail {
    pub fn empty(summary: ConversationSummary) -> Self {
        Self {
            summary,
            messages: Vec::new(),
            token_stats: TokenStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// Returns a new detail with `messages` swapped in and the aggregate recomputed.
    pub fn with_messages(&self, messages: Vec<Message>) -> Self {
        let token_stats = TokenStats::from_messages(&messages);
        Self {
            summary: self.summary.clone(),
            messages,
            token_stats,
        }
    }
}

/// Reply of the non-streaming send endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}
