pub mod client;
pub mod dto;
pub mod tools;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::models::{ChatResponse, ConversationDetail, ConversationSummary};
use crate::storage::StorageError;

pub use client::ApiClient;

/// Raw chunked body of the streaming endpoint.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unauthorized: {}", .detail.as_deref().unwrap_or("credentials rejected"))]
    Unauthorized { detail: Option<String> },
    #[error("API error {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Api { status: u16, detail: Option<String> },
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("No access token available")]
    MissingToken,
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// The backend-provided `detail`, if the failure came with one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { detail } | ApiError::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Text for the UI layer: backend `detail` first, then `fallback`.
    pub fn detail_or(&self, fallback: &str) -> String {
        self.detail().unwrap_or(fallback).to_string()
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// ============================================
// TRAIT DEFINITION - chat surface of the backend
// ============================================
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationSummary>, ApiError>;

    async fn create_conversation(
        &self,
        title: Option<String>,
    ) -> Result<ConversationSummary, ApiError>;

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;

    /// Non-streaming send; the reply carries the persisted assistant message.
    async fn send_message(&self, id: &str, content: &str) -> Result<ChatResponse, ApiError>;

    /// Opens `POST .../messages/stream` and hands back the undecoded body.
    async fn open_message_stream(&self, id: &str, content: &str) -> Result<ByteStream, ApiError>;
}
