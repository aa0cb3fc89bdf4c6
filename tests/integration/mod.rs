// tests/integration/mod.rs

pub use serde_json::json;
pub use std::sync::Arc;

use productivity_client::storage::MemoryCredentialStore;
use productivity_client::{ApiClient, ChatBackend, ChatStore, SnapshotStore, StreamingChatSession};
use serde_json::Value;
use wiremock::MockServer;

pub mod chat_flow;

// ============================================
// Shared Test Helpers
// ============================================

pub struct TestClient {
    pub credentials: Arc<MemoryCredentialStore>,
    pub store: Arc<ChatStore>,
    pub session: StreamingChatSession,
}

/// Wires client, store and session against `server`, with the store's slice
/// persisted under `state_dir`.
pub fn create_test_client(server: &MockServer, state_dir: &std::path::Path) -> TestClient {
    let credentials = Arc::new(MemoryCredentialStore::with_access_token("test-token"));
    let backend: Arc<dyn ChatBackend> =
        Arc::new(ApiClient::new(server.uri(), credentials.clone()));
    let store = Arc::new(
        ChatStore::new(backend.clone()).with_snapshots(SnapshotStore::new(state_dir)),
    );
    let session = StreamingChatSession::new(backend, store.clone());
    TestClient {
        credentials,
        store,
        session,
    }
}

/// Conversation detail as the backend returns it, token aggregate included.
pub fn conversation_json(id: &str, messages: Vec<Value>) -> Value {
    let sum = |field: &str| -> u64 { messages.iter().filter_map(|m| m[field].as_u64()).sum() };
    let (input, output) = (sum("input_tokens"), sum("output_tokens"));
    json!({
        "id": id,
        "user_id": "u1",
        "title": "Integration chat",
        "created_at": "2025-01-01T12:00:00",
        "updated_at": "2025-01-01T12:00:30",
        "token_stats": {
            "input_tokens": input,
            "output_tokens": output,
            "total_tokens": input + output,
            "message_count": messages.len()
        },
        "messages": messages
    })
}

pub fn message_json(id: &str, role: &str, content: &str, input: u64, output: u64) -> Value {
    json!({
        "id": id,
        "conversation_id": "c1",
        "role": role,
        "content": content,
        "input_tokens": input,
        "output_tokens": output,
        "created_at": "2025-01-01T12:00:10"
    })
}

pub const STREAM_BODY: &str =
    "data: {\"content\":\"Hi\"}\n\ndata: {\"content\":\" there\"}\n\ndata: [DONE]\n\n";
