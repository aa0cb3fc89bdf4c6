use productivity_client::api::dto::{
    CodeExplainRequest, CodeGenerateRequest, ExplainLevel, ResearchRequest, DEFAULT_LANGUAGE,
    DEFAULT_MAX_SOURCES,
};
use productivity_client::api::{ApiClient, ApiError};
use productivity_client::storage::MemoryCredentialStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(
        server.uri(),
        Arc::new(MemoryCredentialStore::with_access_token("tok")),
    )
}

#[tokio::test]
async fn test_generate_code_posts_validated_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/code/generate"))
        .and(body_json(json!({
            "description": "reverse a linked list",
            "language": "python"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "def f(): ..."})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .generate_code(&CodeGenerateRequest {
            description: "reverse a linked list".to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            context: None,
        })
        .await
        .unwrap();
    assert_eq!(result["code"], "def f(): ...");

    let err = client
        .generate_code(&CodeGenerateRequest {
            description: "too short".to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            context: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn test_explain_code_sends_level() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/code/explain"))
        .and(body_json(json!({
            "code": "print(1)",
            "language": "python",
            "level": "beginner"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"explanation": "prints"})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .explain_code(&CodeExplainRequest {
            code: "print(1)".to_string(),
            language: "python".to_string(),
            level: ExplainLevel::Beginner,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_research_rejects_invalid_input_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.scrape_url("notaurl").await.is_err());

    let request = ResearchRequest {
        query: "async runtimes in rust".to_string(),
        urls: (0..11).map(|i| format!("https://example.com/{}", i)).collect(),
        max_sources: DEFAULT_MAX_SOURCES,
    };
    assert!(matches!(
        client.research_topic(&request).await,
        Err(ApiError::Validation(_))
    ));
}

#[tokio::test]
async fn test_batch_upload_limits() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    let eleven: Vec<PathBuf> = (0..11).map(|i| PathBuf::from(format!("f{}.pdf", i))).collect();
    assert!(matches!(
        client.batch_upload("quarterly", &eleven).await,
        Err(ApiError::InvalidInput(_))
    ));
    assert!(matches!(
        client.batch_upload("quarterly", &[]).await,
        Err(ApiError::InvalidInput(_))
    ));
    assert!(matches!(
        client.batch_upload(&"x".repeat(101), &eleven[..1]).await,
        Err(ApiError::InvalidInput(_))
    ));
    assert!(matches!(
        client.batch_upload("   ", &eleven[..1]).await,
        Err(ApiError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_batch_upload_sends_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch/upload"))
        .and(header("Authorization", "Bearer tok"))
        .and(body_string_contains("name=\"batch_name\""))
        .and(body_string_contains("quarterly"))
        .and(body_string_contains("filename=\"a.txt\""))
        .and(body_string_contains("filename=\"b.txt\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "batch_job_id": "batch-1",
            "status": "queued"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    tokio::fs::write(&a, "alpha").await.unwrap();
    tokio::fs::write(&b, "beta").await.unwrap();

    let uploaded = client_for(&server)
        .batch_upload("quarterly", &[a, b])
        .await
        .unwrap();
    assert_eq!(uploaded.batch_job_id, "batch-1");
    assert_eq!(uploaded.extra["status"], "queued");
}

#[tokio::test]
async fn test_extract_returns_job_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/extraction/extract"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "job-7",
            "message": "queued"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("invoice.pdf");
    tokio::fs::write(&file, b"%PDF-1.4").await.unwrap();

    let job = client_for(&server).extract_file(&file).await.unwrap();
    assert_eq!(job.job_id, "job-7");
}

#[tokio::test]
async fn test_instruction_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/instruction/preview"))
        .and(body_json(json!({
            "instruction": "drop the tax column",
            "extracted_data": {"tables": []}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"preview": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instruction/examples"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"examples": ["a"]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let data = json!({"tables": []});

    let preview = client
        .preview_instruction("  drop the tax column  ", &data)
        .await
        .unwrap();
    assert_eq!(preview["preview"], true);

    assert!(matches!(
        client.process_instruction("   ", &data).await,
        Err(ApiError::InvalidInput(_))
    ));

    let examples = client.instruction_examples().await.unwrap();
    assert_eq!(examples["examples"][0], "a");
}
