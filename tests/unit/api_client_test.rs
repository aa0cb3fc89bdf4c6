use futures::StreamExt;
use productivity_client::api::dto::{LoginRequest, RegisterRequest};
use productivity_client::api::{ApiClient, ApiError, ChatBackend};
use productivity_client::storage::{CredentialStore, Credentials, MemoryCredentialStore};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, token: Option<&str>) -> (ApiClient, Arc<MemoryCredentialStore>) {
    let credentials = Arc::new(match token {
        Some(token) => MemoryCredentialStore::with_access_token(token),
        None => MemoryCredentialStore::new(),
    });
    let client = ApiClient::new(server.uri(), credentials.clone());
    (client, credentials)
}

fn conversation_json(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "user_id": "u1",
        "title": title,
        "created_at": "2025-01-01T12:00:00",
        "updated_at": "2025-01-01T12:00:00"
    })
}

#[tokio::test]
async fn test_requests_carry_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations/c1"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json("c1", "Chat")))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("tok-123"));
    let detail = client.get_conversation("c1").await.unwrap();

    assert_eq!(detail.id(), "c1");
    assert!(detail.messages.is_empty());
}

#[tokio::test]
async fn test_unauthorized_clears_both_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})),
        )
        .mount(&server)
        .await;

    let (client, credentials) = client_for(&server, None);
    credentials
        .store(Credentials {
            access_token: Some("stale".to_string()),
            refresh_token: Some("stale-refresh".to_string()),
        })
        .await
        .unwrap();

    let err = client.current_user().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized { .. }));
    assert_eq!(err.detail(), Some("Token expired"));
    assert_eq!(err.status(), Some(401));
    assert!(credentials.access_token().await.is_none());
    assert!(credentials.refresh_token().await.is_none());
}

#[tokio::test]
async fn test_error_detail_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/chat/conversations/c9"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"detail": "Conversation not found"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/chat/conversations/c8"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": [{"loc": ["x"]}]})))
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("tok"));

    let err = client.delete_conversation("c9").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.detail_or("Failed"), "Conversation not found");

    // Non-string detail payloads fall back to the caller's message.
    let err = client.delete_conversation("c8").await.unwrap_err();
    assert_eq!(err.detail(), None);
    assert_eq!(err.detail_or("Failed to delete conversation"), "Failed to delete conversation");
}

#[tokio::test]
async fn test_conversation_list_is_cached_until_mutation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations"))
        .and(query_param("limit", "50"))
        .and(query_param("offset", "0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([conversation_json("c1", "First")])),
        )
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/conversations"))
        .and(body_json(json!({"title": "Second"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json("c2", "Second")))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("tok"));

    assert_eq!(client.list_conversations(50, 0).await.unwrap().len(), 1);
    // Served from cache.
    assert_eq!(client.list_conversations(50, 0).await.unwrap().len(), 1);

    client
        .create_conversation(Some("Second".to_string()))
        .await
        .unwrap();
    // Cache was dropped by the create.
    client.list_conversations(50, 0).await.unwrap();
}

#[tokio::test]
async fn test_disabled_cache_always_hits_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(3)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("tok"));
    let client = client.with_cache_ttl(None);
    for _ in 0..3 {
        client.list_conversations(50, 0).await.unwrap();
    }
}

#[tokio::test]
async fn test_open_message_stream_yields_raw_body() {
    let server = MockServer::start().await;
    let body = "data: {\"content\":\"Hi\"}\ndata: [DONE]\n";
    Mock::given(method("POST"))
        .and(path("/chat/conversations/c1/messages/stream"))
        .and(header("Authorization", "Bearer tok"))
        .and(body_json(json!({"content": "Hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("tok"));
    let mut stream = client.open_message_stream("c1", "Hello").await.unwrap();

    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(String::from_utf8(received).unwrap(), body);
}

#[tokio::test]
async fn test_open_message_stream_requires_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, None);
    let err = client.open_message_stream("c1", "Hello").await.err().unwrap();
    assert!(matches!(err, ApiError::MissingToken));
}

#[tokio::test]
async fn test_login_stores_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "ada@example.com", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, credentials) = client_for(&server, None);
    client
        .login(&LoginRequest {
            email: "ada@example.com".to_string(),
            password: "secret".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(credentials.access_token().await.as_deref(), Some("access-1"));
    assert_eq!(credentials.refresh_token().await.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_register_validates_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, None);
    let err = client
        .register(&RegisterRequest {
            email: "not-an-email".to_string(),
            password: "short".to_string(),
            name: Some("Ada".to_string()),
        })
        .await
        .unwrap_err();

    let ApiError::Validation(errors) = &err else {
        panic!("expected a validation error, got {err:?}");
    };
    let fields = errors.field_errors();
    assert!(fields.contains_key("email"));
    assert!(fields.contains_key("password"));
}
