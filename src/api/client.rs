use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{multipart::Form, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use validator::Validate;

use super::dto::{ConversationCreate, LoginRequest, MessageCreate, RegisterRequest};
use super::{ApiError, ByteStream, ChatBackend};
use crate::config::Config;
use crate::models::{ChatResponse, ConversationDetail, ConversationSummary, TokenResponse, User};
use crate::storage::{CredentialStore, Credentials};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Short-lived cache for GET responses that the UI re-requests constantly.
#[derive(Debug)]
struct ResponseCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl ResponseCache {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let ttl = self.ttl?;
        let mut entries = self.entries.lock().await;
        let fresh = entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < ttl)
            .map(|(_, value)| value.clone());
        if fresh.is_none() {
            entries.remove(key);
        }
        fresh
    }

    async fn put(&self, key: String, value: Value) {
        if self.ttl.is_some() {
            self.entries.lock().await.insert(key, (Instant::now(), value));
        }
    }

    async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<Value>,
}

/// Typed facade over the backend REST API.
///
/// Every call reads the bearer token from the shared [`CredentialStore`]; a 401
/// from any endpoint wipes the stored tokens before the error is returned.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    cache: Arc<ResponseCache>,
}

impl ApiClient {
    pub fn new(base_url: String, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            cache: Arc::new(ResponseCache::new(Some(DEFAULT_CACHE_TTL))),
        }
    }

    pub fn from_config(config: &Config, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::new(config.base_url().to_string(), credentials).with_cache_ttl(config.cache_ttl())
    }

    /// `None` disables response caching.
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache = Arc::new(ResponseCache::new(ttl));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.access_token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends the request and maps non-success statuses onto [`ApiError`].
    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorized(builder).await.send().await?;
        self.check(response).await
    }

    async fn check(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = extract_detail(response).await;
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Backend rejected credentials; clearing stored tokens");
            if let Err(e) = self.credentials.clear().await {
                tracing::error!("Failed to clear credentials after 401: {}", e);
            }
            return Err(ApiError::Unauthorized { detail });
        }

        Err(ApiError::Api {
            status: status.as_u16(),
            detail,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(self.client.get(self.url(path))).await?;
        Self::decode(response).await
    }

    async fn get_json_cached<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        if let Some(value) = self.cache.get(path).await {
            tracing::debug!("Cache hit for GET {}", path);
            return serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()));
        }

        let value: Value = self.get_json(path).await?;
        self.cache.put(path.to_string(), value.clone()).await;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.client.post(self.url(path)).json(body))
            .await?;
        Self::decode(response).await
    }

    /// POST whose reply is a binary payload rather than JSON.
    pub async fn post_for_bytes<B>(&self, path: &str, body: &B) -> Result<Bytes, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .execute(self.client.post(self.url(path)).json(body))
            .await?;
        Ok(response.bytes().await?)
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, ApiError> {
        let response = self
            .execute(self.client.post(self.url(path)).multipart(form))
            .await?;
        Self::decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.client.delete(self.url(path))).await?;
        Ok(())
    }

    pub async fn invalidate_cache(&self) {
        self.cache.clear().await;
    }

    // ==================== AUTH ====================

    pub async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError> {
        request.validate()?;
        let tokens: TokenResponse = self.post_json("/auth/login", request).await?;
        self.remember_tokens(&tokens).await?;
        Ok(tokens)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<TokenResponse, ApiError> {
        request.validate()?;
        let tokens: TokenResponse = self.post_json("/auth/register", request).await?;
        self.remember_tokens(&tokens).await?;
        Ok(tokens)
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get_json("/auth/me").await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.credentials.clear().await?;
        self.cache.clear().await;
        Ok(())
    }

    async fn remember_tokens(&self, tokens: &TokenResponse) -> Result<(), ApiError> {
        if tokens.access_token.is_some() {
            self.credentials
                .store(Credentials {
                    access_token: tokens.access_token.clone(),
                    refresh_token: tokens.refresh_token.clone(),
                })
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn list_conversations(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        self.get_json_cached(&format!(
            "/chat/conversations?limit={}&offset={}",
            limit, offset
        ))
        .await
    }

    async fn create_conversation(
        &self,
        title: Option<String>,
    ) -> Result<ConversationSummary, ApiError> {
        self.cache.clear().await;
        self.post_json("/chat/conversations", &ConversationCreate { title })
            .await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        self.get_json(&format!("/chat/conversations/{}", id)).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.cache.clear().await;
        self.delete(&format!("/chat/conversations/{}", id)).await
    }

    async fn send_message(&self, id: &str, content: &str) -> Result<ChatResponse, ApiError> {
        self.cache.clear().await;
        self.post_json(
            &format!("/chat/conversations/{}/messages", id),
            &MessageCreate { content },
        )
        .await
    }

    async fn open_message_stream(&self, id: &str, content: &str) -> Result<ByteStream, ApiError> {
        // The streaming POST needs the raw body, so it skips `execute` but keeps
        // the same token source and 401 handling.
        let token = self
            .credentials
            .access_token()
            .await
            .ok_or(ApiError::MissingToken)?;
        self.cache.clear().await;

        let response = self
            .client
            .post(self.url(&format!("/chat/conversations/{}/messages/stream", id)))
            .bearer_auth(token)
            .json(&MessageCreate { content })
            .send()
            .await?;
        let response = self.check(response).await?;

        tracing::debug!("Opened message stream for conversation {}", id);
        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(ApiError::from)),
        ))
    }
}

/// Pulls a string `detail` out of an error body; anything else yields `None`.
async fn extract_detail(response: Response) -> Option<String> {
    let body = response.bytes().await.ok()?;
    let parsed: ErrorBody = serde_json::from_slice(&body).ok()?;
    match parsed.detail? {
        Value::String(detail) => Some(detail),
        _ => None,
    }
}
