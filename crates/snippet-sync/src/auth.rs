//! # Token Authority
//!
//! Produces a usable access token on demand and renews it when the backend
//! rejects the current one.
//!
//! ## Renewal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Token Renewal                                    │
//! │                                                                         │
//! │  ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐    │
//! │  │ Remote loader│     │ TokenAuthority   │     │ Auth endpoints   │    │
//! │  └──────┬───────┘     └────────┬─────────┘     └────────┬─────────┘    │
//! │         │  401/403             │                        │              │
//! │         │  refresh_token()     │                        │              │
//! │         │─────────────────────►│ try_lock               │              │
//! │         │                      │   busy? ──► Skipped    │              │
//! │         │                      │                        │              │
//! │         │                      │ LOGIN strategy:        │              │
//! │         │                      │  login(refresh) ──────►│              │
//! │         │                      │◄── accessToken ────────│              │
//! │         │                      │  rejected? register ──►│              │
//! │         │                      │  then login again      │              │
//! │         │                      │                        │              │
//! │         │                      │ REGISTER strategy:     │              │
//! │         │                      │  register(device) ────►│              │
//! │         │                      │◄── refreshToken ───────│ (bearer)     │
//! │         │                      │                        │              │
//! │         │                      │ save to store          │              │
//! │         │                      │ publish on watch       │              │
//! │         │◄── Renewed ──────────│                        │              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Flight
//! At most one renewal runs at a time. A caller that finds a renewal in
//! progress gets [`Renewal::Skipped`] immediately and must re-read the token
//! afterwards; it gets no guarantee that the token is newer than the one it
//! saw rejected.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use snippet_core::Credentials;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::AuthStrategy;
use crate::credentials::CredentialStore;
use crate::error::{SyncError, SyncResult};
use crate::http::{endpoint, ensure_success, API_KEY_HEADER};

/// How long `ensure_token` waits for a renewal started by another caller.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Auth API
// =============================================================================

/// Remote authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Registers this installation and returns a refresh token.
    async fn register(&self, device_id: &str) -> SyncResult<String>;

    /// Exchanges a refresh token for an access token.
    async fn login(&self, refresh_token: &str) -> SyncResult<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    device_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

/// JSON-over-HTTP implementation of [`AuthApi`].
pub struct HttpAuthApi {
    client: Client,
    auth_url: String,
    api_key: String,
}

impl HttpAuthApi {
    pub fn new(client: Client, auth_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpAuthApi {
            client,
            auth_url: auth_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn register(&self, device_id: &str) -> SyncResult<String> {
        let url = endpoint(&self.auth_url, "register");
        debug!(%url, device_id, "Registering device");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&RegisterRequest { device_id })
            .send()
            .await?;
        let body: RegisterResponse = ensure_success(response).await?.json().await?;

        non_empty(body.refresh_token, "refreshToken")
    }

    async fn login(&self, refresh_token: &str) -> SyncResult<String> {
        let url = endpoint(&self.auth_url, "login");
        debug!(%url, "Logging in");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&LoginRequest { refresh_token })
            .send()
            .await?;
        let body: LoginResponse = ensure_success(response).await?.json().await?;

        non_empty(body.access_token, "accessToken")
    }
}

fn non_empty(token: String, field: &str) -> SyncResult<String> {
    if token.is_empty() {
        Err(SyncError::AuthFailed(format!("server returned an empty {}", field)))
    } else {
        Ok(token)
    }
}

// =============================================================================
// Token Authority
// =============================================================================

/// Result of a [`TokenAuthority::refresh_token`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// This call renewed the credentials.
    Renewed,
    /// Another renewal was already running; nothing was done.
    Skipped,
}

/// Owner of the current credentials.
pub struct TokenAuthority {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    strategy: AuthStrategy,
    device_id: String,
    credentials: RwLock<Credentials>,
    token_tx: watch::Sender<Option<String>>,
    renewal: Mutex<()>,
    /// Error of the most recent renewal, cleared by a successful one.
    last_failure: RwLock<Option<SyncError>>,
    restored: OnceCell<()>,
    wait_timeout: Duration,
}

impl TokenAuthority {
    /// Creates an authority. Stored credentials are restored lazily on first use.
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        strategy: AuthStrategy,
        device_id: impl Into<String>,
    ) -> Self {
        let (token_tx, _) = watch::channel(None);
        TokenAuthority {
            api,
            store,
            strategy,
            device_id: device_id.into(),
            credentials: RwLock::new(Credentials::empty()),
            token_tx,
            renewal: Mutex::new(()),
            last_failure: RwLock::new(None),
            restored: OnceCell::new(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Overrides how long `ensure_token` waits on another caller's renewal.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    /// Watches the access token; yields on every change.
    pub fn get_token(&self) -> watch::Receiver<Option<String>> {
        self.token_tx.subscribe()
    }

    /// Current access token without any I/O.
    pub fn current_token(&self) -> Option<String> {
        self.token_tx.borrow().clone()
    }

    /// Returns the current token, renewing when there is none.
    pub async fn ensure_token(&self) -> SyncResult<String> {
        self.restore().await;
        if let Some(token) = self.current_token() {
            return Ok(token);
        }

        match self.refresh_token().await? {
            Renewal::Renewed => self
                .current_token()
                .ok_or_else(|| SyncError::AuthFailed("renewal produced no access token".into())),
            Renewal::Skipped => self.wait_for_token().await,
        }
    }

    /// Renews the credentials unless a renewal is already running.
    ///
    /// On failure the store and the in-memory credentials are left untouched.
    pub async fn refresh_token(&self) -> SyncResult<Renewal> {
        let _guard = match self.renewal.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Token renewal already in flight, skipping");
                return Ok(Renewal::Skipped);
            }
        };

        self.restore().await;
        let current = self.credentials.read().await.clone();

        let renewed = match self.strategy {
            AuthStrategy::Register => self.register().await,
            AuthStrategy::Login => self.login(&current).await,
        };
        let renewed = match renewed {
            Ok(renewed) => renewed,
            Err(e) => {
                *self.last_failure.write().await = Some(e.clone());
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&renewed).await {
            warn!(error = %e, "Failed to persist renewed credentials");
        }
        *self.credentials.write().await = renewed.clone();
        *self.last_failure.write().await = None;
        self.token_tx.send_replace(renewed.access_token);

        info!(strategy = %self.strategy, "Access token renewed");
        Ok(Renewal::Renewed)
    }

    /// Forgets all credentials, in memory and in the store.
    pub async fn sign_out(&self) -> SyncResult<()> {
        let _guard = self.renewal.lock().await;
        self.store.clear().await?;
        *self.credentials.write().await = Credentials::empty();
        self.token_tx.send_replace(None);
        info!("Signed out");
        Ok(())
    }

    // =========================================================================
    // Strategies
    // =========================================================================

    async fn register(&self) -> SyncResult<Credentials> {
        let token = self.api.register(&self.device_id).await?;
        Ok(Credentials {
            access_token: Some(token.clone()),
            refresh_token: Some(token),
        })
    }

    async fn login(&self, current: &Credentials) -> SyncResult<Credentials> {
        let refresh = match &current.refresh_token {
            Some(token) => token.clone(),
            None => {
                debug!("No refresh token, registering first");
                self.api.register(&self.device_id).await?
            }
        };

        match self.api.login(&refresh).await {
            Ok(access) => Ok(Credentials {
                access_token: Some(access),
                refresh_token: Some(refresh),
            }),
            Err(e) if e.is_auth_error() && current.refresh_token.is_some() => {
                warn!(error = %e, "Refresh token rejected, registering again");
                let refresh = self.api.register(&self.device_id).await?;
                let access = self.api.login(&refresh).await?;
                Ok(Credentials {
                    access_token: Some(access),
                    refresh_token: Some(refresh),
                })
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn restore(&self) {
        self.restored
            .get_or_init(|| async {
                match self.store.load().await {
                    Ok(credentials) => {
                        if credentials.access_token.is_some() {
                            debug!("Restored stored credentials");
                        }
                        self.token_tx.send_replace(credentials.access_token.clone());
                        *self.credentials.write().await = credentials;
                    }
                    Err(e) => warn!(error = %e, "Failed to read stored credentials"),
                }
            })
            .await;
    }

    /// Waits for the renewal another caller is running, then reports its
    /// result: the new token, or the error that renewal ended with.
    async fn wait_for_token(&self) -> SyncResult<String> {
        match tokio::time::timeout(self.wait_timeout, self.renewal.lock()).await {
            Ok(guard) => drop(guard),
            Err(_) => return Err(SyncError::Timeout("waiting for token renewal".into())),
        }

        if let Some(token) = self.current_token() {
            return Ok(token);
        }
        match self.last_failure.read().await.clone() {
            Some(e) => Err(e),
            None => Err(SyncError::AuthFailed("no access token".into())),
        }
    }
}
