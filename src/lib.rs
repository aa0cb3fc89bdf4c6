//! Productivity Client - async client for the AI Productivity Engine backend

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;

// Re-export main types for convenience
pub use crate::api::{ApiClient, ApiError, ChatBackend};
pub use crate::auth::{AuthSession, AuthState};
pub use crate::config::Config;
pub use crate::models::{ConversationDetail, ConversationSummary, Message, Role, TokenStats, User};
pub use crate::services::{JobPoller, SessionError, StreamEnd, StreamOutcome, StreamingChatSession};
pub use crate::state::{ChatState, ChatStore};
pub use crate::storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore, SnapshotStore};
