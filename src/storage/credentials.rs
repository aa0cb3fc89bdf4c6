use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::{read_json, remove_file, write_json, StorageError};

/// The `access_token` / `refresh_token` pair handed out by the auth endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Token source shared by the REST facade, the streaming POST and the auth session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn access_token(&self) -> Option<String>;
    async fn refresh_token(&self) -> Option<String>;
    async fn store(&self, credentials: Credentials) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access_token(token: &str) -> Self {
        Self {
            inner: RwLock::new(Credentials {
                access_token: Some(token.to_string()),
                refresh_token: None,
            }),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn access_token(&self) -> Option<String> {
        self.inner.read().await.access_token.clone()
    }

    async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.refresh_token.clone()
    }

    async fn store(&self, credentials: Credentials) -> Result<(), StorageError> {
        *self.inner.write().await = credentials;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.inner.write().await = Credentials::default();
        Ok(())
    }
}

/// Keeps tokens in `credentials.json` so a login survives process restarts.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    inner: RwLock<Credentials>,
}

impl FileCredentialStore {
    pub const FILE_NAME: &'static str = "credentials.json";

    pub async fn open(state_dir: &Path) -> Result<Self, StorageError> {
        let path = state_dir.join(Self::FILE_NAME);
        let credentials = read_json::<Credentials>(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            inner: RwLock::new(credentials),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn access_token(&self) -> Option<String> {
        self.inner.read().await.access_token.clone()
    }

    async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.refresh_token.clone()
    }

    async fn store(&self, credentials: Credentials) -> Result<(), StorageError> {
        let mut guard = self.inner.write().await;
        write_json(&self.path, &credentials).await?;
        *guard = credentials;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut guard = self.inner.write().await;
        remove_file(&self.path).await?;
        *guard = Credentials::default();
        tracing::debug!("Cleared stored credentials at {}", self.path.display());
        Ok(())
    }
}
