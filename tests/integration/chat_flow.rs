use super::*;
use productivity_client::api::ApiError;
use productivity_client::storage::CredentialStore;
use productivity_client::{Role, SessionError, StreamEnd};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_initial_detail(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/chat/conversations/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json("c1", vec![])))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn mount_stream(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/conversations/c1/messages/stream"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_json(json!({"content": "Hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM_BODY, "text/event-stream"))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_streamed_reply_is_reconciled_with_backend() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_initial_detail(&server).await;
    mount_stream(&server).await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([conversation_json("c1", vec![])])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json(
            "c1",
            vec![
                message_json("m1", "user", "Hello", 2, 0),
                message_json("m2", "assistant", "Hi there", 0, 3),
            ],
        )))
        .mount(&server)
        .await;

    let client = create_test_client(&server, dir.path());
    client.store.select_conversation("c1").await.unwrap();

    let outcome = client.session.send("c1", "Hello").await.unwrap();
    assert_eq!(outcome.content, "Hi there");
    assert_eq!(outcome.output_tokens, 8);
    assert_eq!(outcome.malformed_frames, 0);
    assert_eq!(outcome.end, StreamEnd::Completed { reconciled: true });

    let state = client.store.state();
    assert!(!state.is_streaming);
    let current = state.current_conversation.unwrap();
    let ids: Vec<&str> = current.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    // Server-computed counts replace the character-count approximation.
    assert_eq!(current.messages[1].output_tokens, 3);
    assert_eq!(current.token_stats.total_tokens, 5);

    let snapshot = SnapshotStore::new(dir.path())
        .load_chat()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.current_conversation.unwrap().messages.len(), 2);
    assert_eq!(snapshot.conversations.len(), 1);
}

#[tokio::test]
async fn test_reply_stays_visible_when_reconciliation_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_initial_detail(&server).await;
    mount_stream(&server).await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = create_test_client(&server, dir.path());
    client.store.select_conversation("c1").await.unwrap();

    let outcome = client.session.send("c1", "Hello").await.unwrap();
    assert_eq!(outcome.end, StreamEnd::Completed { reconciled: false });

    let current = client.store.current().unwrap();
    assert_eq!(current.messages.len(), 2);

    let user = &current.messages[0];
    assert_eq!(user.role, Role::User);
    assert_eq!(user.content, "Hello");
    assert_eq!(user.input_tokens, 5);
    assert!(user.is_local());

    let reply = &current.messages[1];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Hi there");
    assert_eq!(reply.output_tokens, 8);
    assert_eq!(current.token_stats.output_tokens, 8);
}

#[tokio::test]
async fn test_rejected_stream_rolls_back_and_signs_out() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_initial_detail(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/conversations/c1/messages/stream"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Could not validate credentials"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server, dir.path());
    client.store.select_conversation("c1").await.unwrap();

    let err = client.session.send("c1", "Hello").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::StreamStart(ApiError::Unauthorized { .. })
    ));

    let state = client.store.state();
    assert!(state.current_conversation.unwrap().messages.is_empty());
    assert!(!state.is_streaming);
    assert_eq!(state.error.as_deref(), Some("Could not validate credentials"));
    assert!(client.credentials.access_token().await.is_none());
}

#[tokio::test]
async fn test_create_then_stream_into_new_conversation() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/chat/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json("c1", vec![])))
        .expect(1)
        .mount(&server)
        .await;
    mount_stream(&server).await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([conversation_json("c1", vec![])])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/conversations/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json(
            "c1",
            vec![
                message_json("m1", "user", "Hello", 5, 0),
                message_json("m2", "assistant", "Hi there", 0, 8),
            ],
        )))
        .mount(&server)
        .await;

    let client = create_test_client(&server, dir.path());
    let created = client.store.create_conversation(None).await.unwrap();
    assert_eq!(created.id, "c1");

    let outcome = client.session.send(&created.id, "  Hello  ").await.unwrap();
    assert_eq!(outcome.output_tokens, 8);

    let current = client.store.current().unwrap();
    assert!(current.messages.iter().all(|m| !m.is_local()));
    assert_eq!(current.token_stats.total_tokens, 13);
}
