//! # Local Snapshot Cache
//!
//! Durable key → snippet list store backing the "stale" half of
//! stale-while-revalidate.
//!
//! ## Layout
//! ```text
//! <cache_dir>/
//! └── <tag>/                 one directory per namespace
//!     ├── site1.json         Direct: keyed by project_id
//!     ├── xyz.json           SharedLink: keyed by shared_id
//!     └── xyz.share          resolved shared snippet id, if any
//! ```
//!
//! Tags and keys are percent-encoded into file names (`my.site` becomes
//! `my%2Esite.json`), so distinct keys never share a file.
//!
//! The cache never fails the outcome stream: write errors are logged and
//! read errors (missing, unreadable, corrupt) are reported as a miss.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snippet_core::{ProjectSnapshot, Snippet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bytes kept verbatim in file names; everything else becomes `%XX`.
const FILE_NAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// A cached snippet list and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub snippets: Vec<Snippet>,
    pub saved_at: DateTime<Utc>,
    /// Shared snippet id resolved by the load that produced this entry.
    pub shared_snippet_id: Option<String>,
}

/// File-per-key snippet cache under a tag directory.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: PathBuf,
}

impl SnapshotCache {
    /// Creates a cache rooted at `<dir>/<tag>`. Nothing touches the disk yet.
    pub fn new(dir: impl AsRef<Path>, tag: &str) -> Self {
        SnapshotCache {
            root: dir.as_ref().join(encode_component(tag)),
        }
    }

    /// Directory holding this tag's entries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_component(key)))
    }

    fn share_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.share", encode_component(key)))
    }

    /// Overwrites the entry for `key`. Errors are logged, never returned.
    pub async fn save(&self, key: &str, snippets: &[Snippet]) {
        if let Err(e) = self.try_save(key, snippets, None).await {
            warn!(key, error = %e, "Failed to write snapshot cache");
        }
    }

    /// Overwrites the entry for `key` with a loaded snapshot, keeping its
    /// shared snippet id alongside the list.
    pub async fn save_snapshot(&self, key: &str, snapshot: &ProjectSnapshot) {
        let shared = snapshot.shared_snippet_id.as_deref();
        if let Err(e) = self.try_save(key, &snapshot.snippets, shared).await {
            warn!(key, error = %e, "Failed to write snapshot cache");
        }
    }

    async fn try_save(
        &self,
        key: &str,
        snippets: &[Snippet],
        shared_snippet_id: Option<&str>,
    ) -> std::io::Result<()> {
        let contents = serde_json::to_vec(snippets)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.entry_path(key);
        write_replace(&path, &contents).await?;

        let share = self.share_path(key);
        match shared_snippet_id {
            Some(id) => write_replace(&share, id.as_bytes()).await?,
            None => match tokio::fs::remove_file(&share).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
        }

        debug!(key, count = snippets.len(), "Snapshot cached");
        Ok(())
    }

    /// Returns the cached snippets, or `None` on any miss.
    pub async fn load(&self, key: &str) -> Option<Vec<Snippet>> {
        self.load_entry(key).await.map(|entry| entry.snippets)
    }

    /// Returns the cached snippets with the time they were written.
    pub async fn load_entry(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key, "Snapshot cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to read snapshot cache");
                return None;
            }
        };

        let snippets: Vec<Snippet> = match serde_json::from_slice(&bytes) {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(key, error = %e, "Corrupt snapshot cache entry, ignoring");
                return None;
            }
        };

        let saved_at = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let shared_snippet_id = tokio::fs::read_to_string(self.share_path(key))
            .await
            .ok()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Some(CacheEntry {
            snippets,
            saved_at,
            shared_snippet_id,
        })
    }

    /// Removes every entry under this tag.
    pub async fn clear(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(root = ?self.root, "Snapshot cache cleared"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(root = ?self.root, error = %e, "Failed to clear snapshot cache"),
        }
    }
}

/// Writes through a temp file so readers never see a partial file.
async fn write_replace(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Maps an arbitrary key or tag to one path component, reversibly.
fn encode_component(value: &str) -> String {
    if value.is_empty() {
        // `%` alone is never produced by the encoder.
        return "%".to_string();
    }
    utf8_percent_encode(value, FILE_NAME_SAFE).to_string()
}
