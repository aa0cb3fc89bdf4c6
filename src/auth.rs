use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::api::dto::{LoginRequest, RegisterRequest};
use crate::api::{ApiClient, ApiError};
use crate::models::User;
use crate::storage::{AuthSnapshot, SnapshotStore, StorageError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Login state on top of the token store.
///
/// Tokens themselves live in the client's `CredentialStore`; this keeps the
/// user profile and the `is_authenticated` flag, and persists both.
pub struct AuthSession {
    client: ApiClient,
    state: RwLock<AuthState>,
    snapshots: Option<SnapshotStore>,
}

impl AuthSession {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            state: RwLock::new(AuthState::default()),
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated
    }

    pub async fn current_user(&self) -> Option<User> {
        self.state.read().await.user.clone()
    }

    /// Loads the persisted profile. A snapshot claiming a login is ignored
    /// when no access token survived alongside it.
    pub async fn restore(&self) -> Result<bool, StorageError> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(false);
        };
        let Some(snapshot) = snapshots.load_auth().await? else {
            return Ok(false);
        };

        let has_token = self.client.credentials().access_token().await.is_some();
        let mut state = self.state.write().await;
        state.user = snapshot.user;
        state.is_authenticated = snapshot.is_authenticated && has_token;
        Ok(true)
    }

    async fn persist(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshot = {
            let state = self.state.read().await;
            AuthSnapshot {
                user: state.user.clone(),
                is_authenticated: state.is_authenticated,
            }
        };
        if let Err(e) = snapshots.save_auth(&snapshot).await {
            warn!("Failed to persist auth state: {}", e);
        }
    }

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error = None;
    }

    async fn settle(
        &self,
        result: Result<User, ApiError>,
        error_text: impl FnOnce(&ApiError) -> String,
    ) -> Result<User, ApiError> {
        {
            let mut state = self.state.write().await;
            state.is_loading = false;
            match &result {
                Ok(user) => {
                    state.user = Some(user.clone());
                    state.is_authenticated = true;
                    state.error = None;
                }
                Err(e) => {
                    state.user = None;
                    state.is_authenticated = false;
                    state.error = Some(error_text(e));
                }
            }
        }
        self.persist().await;
        result
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.begin().await;
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let result = match self.client.login(&request).await {
            Ok(_) => self.client.current_user().await,
            Err(e) => Err(e),
        };
        if let Ok(user) = &result {
            info!("Logged in as {}", user.email);
        }
        self.settle(result, |e| {
            e.detail().map(str::to_string).unwrap_or_else(|| e.to_string())
        })
        .await
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, ApiError> {
        self.begin().await;
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.map(str::to_string),
        };
        let result = match self.client.register(&request).await {
            Ok(_) => self.client.current_user().await,
            Err(e) => Err(e),
        };
        if let Ok(user) = &result {
            info!("Registered {}", user.email);
        }
        self.settle(result, |e| e.detail_or("Registration failed"))
            .await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.client.logout().await?;
        *self.state.write().await = AuthState::default();
        self.persist().await;
        Ok(())
    }

    /// Re-validates the stored token against `/auth/me`. Any failure drops the
    /// tokens and leaves the session signed out without an error message.
    pub async fn check_auth(&self) -> bool {
        if self.client.credentials().access_token().await.is_none() {
            let mut state = self.state.write().await;
            state.user = None;
            state.is_authenticated = false;
            drop(state);
            self.persist().await;
            return false;
        }

        self.state.write().await.is_loading = true;
        let authenticated = match self.client.current_user().await {
            Ok(user) => {
                *self.state.write().await = AuthState {
                    user: Some(user),
                    is_authenticated: true,
                    is_loading: false,
                    error: None,
                };
                true
            }
            Err(e) => {
                warn!("Stored session is no longer valid: {}", e);
                if let Err(e) = self.client.credentials().clear().await {
                    warn!("Failed to clear credentials: {}", e);
                }
                *self.state.write().await = AuthState::default();
                false
            }
        };
        self.persist().await;
        authenticated
    }
}
