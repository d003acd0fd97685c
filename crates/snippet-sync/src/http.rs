//! HTTP plumbing shared by the auth API and the remote loader.

use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Header carrying the embedder's API key on every request.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Builds the client used for all backend requests.
pub fn build_client(request_timeout: Duration, connect_timeout: Duration) -> SyncResult<Client> {
    Client::builder()
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .user_agent(concat!("snippet-sdk/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))
}

/// Passes 2xx responses through; turns anything else into a typed error.
pub async fn ensure_success(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    debug!(status = status.as_u16(), %url, "Request rejected");
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(SyncError::from_status(status.as_u16(), message))
}

/// Joins a path onto a base URL without doubling slashes.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
