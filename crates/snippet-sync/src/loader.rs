//! # Remote Loader
//!
//! Authenticated fetch of the project snapshot.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Remote Load                                     │
//! │                                                                         │
//! │  DIRECT                                                                 │
//! │  GET {base}/organizations/{org}/projects/{proj}/register                │
//! │      ──► { snippets: [...] }                                            │
//! │                                                                         │
//! │  SHARED LINK (one logical load, two requests)                           │
//! │  GET {base}/shared/{shared_id}                                          │
//! │      ──► { shareToken, snippetId? }                                     │
//! │  GET {base}/register-shared?shareToken=...                              │
//! │      ──► { snippets: [...] }                                            │
//! │                                                                         │
//! │  Every request: Authorization: Bearer <token>, x-api-key: <api key>     │
//! │  401/403 ──► refresh_token() once ──► same request once more            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::DATE;
use reqwest::{Client, Response};
use serde::Deserialize;
use snippet_core::{Configuration, ProjectSnapshot, Snippet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{Renewal, TokenAuthority};
use crate::error::{SyncError, SyncResult};
use crate::http::{ensure_success, API_KEY_HEADER};

/// Source of project snapshots.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self) -> SyncResult<ProjectSnapshot>;
}

#[derive(Deserialize)]
struct ProjectBody {
    snippets: Vec<Snippet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareBody {
    share_token: String,
    #[serde(default)]
    snippet_id: Option<String>,
}

/// [`SnapshotLoader`] backed by the snippet HTTP API.
pub struct HttpRemoteLoader {
    client: Client,
    base_url: Url,
    configuration: Configuration,
    auth: Arc<TokenAuthority>,
}

impl HttpRemoteLoader {
    pub fn new(
        client: Client,
        base_url: &str,
        configuration: Configuration,
        auth: Arc<TokenAuthority>,
    ) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!("not a base URL: {}", base_url)));
        }
        Ok(HttpRemoteLoader {
            client,
            base_url,
            configuration,
            auth,
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    // =========================================================================
    // Variants
    // =========================================================================

    async fn load_direct(&self, organization_id: &str, project_id: &str) -> SyncResult<ProjectSnapshot> {
        let url = self.url(&["organizations", organization_id, "projects", project_id, "register"])?;
        let response = self.get_authorized(&url, &[]).await?;
        let fetched_at = server_time(&response);
        let body: ProjectBody = response.json().await?;

        Ok(ProjectSnapshot::new(body.snippets, fetched_at))
    }

    async fn load_shared(&self, shared_id: &str) -> SyncResult<ProjectSnapshot> {
        let url = self.url(&["shared", shared_id])?;
        let share: ShareBody = self.get_authorized(&url, &[]).await?.json().await?;
        debug!(shared_id, snippet_id = ?share.snippet_id, "Share link resolved");

        let url = self.url(&["register-shared"])?;
        let response = self
            .get_authorized(&url, &[("shareToken", share.share_token.as_str())])
            .await?;
        let fetched_at = server_time(&response);
        let body: ProjectBody = response.json().await?;

        let snippet_id = share.snippet_id.unwrap_or_else(|| shared_id.to_string());
        Ok(ProjectSnapshot::new(body.snippets, fetched_at).with_shared_snippet_id(snippet_id))
    }

    // =========================================================================
    // Requests
    // =========================================================================

    fn url(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(format!("not a base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET with one token renewal and one retry on 401/403.
    async fn get_authorized(&self, url: &Url, query: &[(&str, &str)]) -> SyncResult<Response> {
        let token = self.auth.ensure_token().await?;
        match self.send(url, query, &token).await {
            Err(e) if e.is_auth_error() => {
                warn!(%url, error = %e, "Request rejected, renewing token");
                if self.auth.refresh_token().await? == Renewal::Skipped {
                    debug!("Renewal already running elsewhere, retrying with current token");
                }
                let token = self.auth.ensure_token().await?;
                self.send(url, query, &token).await
            }
            other => other,
        }
    }

    async fn send(&self, url: &Url, query: &[(&str, &str)], token: &str) -> SyncResult<Response> {
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .bearer_auth(token)
            .header(API_KEY_HEADER, self.configuration.api_key())
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl SnapshotLoader for HttpRemoteLoader {
    async fn load(&self) -> SyncResult<ProjectSnapshot> {
        let snapshot = match &self.configuration {
            Configuration::Direct {
                organization_id,
                project_id,
                ..
            } => self.load_direct(organization_id, project_id).await?,
            Configuration::SharedLink { shared_id, .. } => self.load_shared(shared_id).await?,
        };

        if let Err(e) = snapshot.check_unique_ids() {
            warn!(error = %e, "Project contains duplicate snippet ids");
        }

        info!(
            project = %self.configuration,
            snippets = snapshot.len(),
            fetched_at = %snapshot.fetched_at,
            "Project loaded"
        );
        Ok(snapshot)
    }
}

/// Server-declared response time, falling back to the local clock.
fn server_time(response: &Response) -> DateTime<Utc> {
    response
        .headers()
        .get(DATE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or_else(Utc::now)
}

/// Parses an IMF-fixdate / RFC 2822 date. A weekday that disagrees with the
/// date is ignored rather than rejected.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .ok()
        .or_else(|| {
            let (_, date) = value.split_once(',')?;
            DateTime::parse_from_rfc2822(date.trim()).ok()
        })
        .map(|time| time.with_timezone(&Utc))
}
