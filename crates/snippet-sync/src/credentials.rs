//! # Credential Store
//!
//! Persists access and refresh tokens across process restarts.
//!
//! Only [`TokenAuthority`](crate::auth::TokenAuthority) writes to a store.
//! A missing or unreadable file loads as empty credentials, which simply
//! triggers a fresh registration.

use async_trait::async_trait;
use snippet_core::Credentials;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::SyncResult;

/// Durable holder of the current [`Credentials`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored credentials, or empty ones.
    async fn load(&self) -> SyncResult<Credentials>;

    /// Replaces the stored credentials.
    async fn save(&self, credentials: &Credentials) -> SyncResult<()>;

    /// Removes the stored credentials.
    async fn clear(&self) -> SyncResult<()>;
}

// =============================================================================
// File Store
// =============================================================================

/// JSON file store (`credentials.json`).
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCredentialStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> SyncResult<Credentials> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No stored credentials");
                return Ok(Credentials::empty());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(credentials) => Ok(credentials),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Stored credentials are corrupt, ignoring");
                Ok(Credentials::empty())
            }
        }
    }

    async fn save(&self, credentials: &Credentials) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_vec_pretty(credentials)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = ?self.path, "Credentials saved");
        Ok(())
    }

    async fn clear(&self) -> SyncResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory store for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        MemoryCredentialStore {
            inner: RwLock::new(credentials),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> SyncResult<Credentials> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, credentials: &Credentials) -> SyncResult<()> {
        *self.inner.write().await = credentials.clone();
        Ok(())
    }

    async fn clear(&self) -> SyncResult<()> {
        *self.inner.write().await = Credentials::empty();
        Ok(())
    }
}
