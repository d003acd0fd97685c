//! # Domain Types
//!
//! Core domain types used throughout the Snippet SDK.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Configuration  │   │ ProjectSnapshot │   │    Snippet      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Direct         │   │  snippets ──────┼──►│  id             │       │
//! │  │  SharedLink     │   │  fetched_at     │   │  props          │       │
//! │  └─────────────────┘   │  shared_id      │   │  target         │       │
//! │                        └─────────────────┘   │  visible        │       │
//! │                                              └─────────────────┘       │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │   Credentials   │   │  NetworkStatus  │                             │
//! │  │  ─────────────  │   │  ─────────────  │                             │
//! │  │  access_token?  │   │  Connected      │                             │
//! │  │  refresh_token? │   │  Disconnected   │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::validation::{validate_api_key, validate_identifier, ValidationResult};

// =============================================================================
// Configuration
// =============================================================================

/// Which project the SDK loads, and how.
///
/// ## Variants
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  DIRECT                              │  SHARED LINK                     │
/// │  ──────                              │  ───────────                     │
/// │  organization_id + project_id        │  shared_id                       │
/// │  One authenticated request           │  shared_id → share token →       │
/// │                                      │  project snapshot                │
/// │  Cache key: project_id               │  Cache key: shared_id            │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Configuration {
    /// Project addressed by organization and project identifiers.
    Direct {
        organization_id: String,
        project_id: String,
        api_key: String,
    },

    /// Project resolved through a shared link.
    SharedLink { shared_id: String, api_key: String },
}

impl Configuration {
    /// Creates a direct configuration.
    pub fn direct(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Configuration::Direct {
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            api_key: api_key.into(),
        }
    }

    /// Creates a shared-link configuration.
    pub fn shared_link(shared_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Configuration::SharedLink {
            shared_id: shared_id.into(),
            api_key: api_key.into(),
        }
    }

    /// Returns the API key sent with every request.
    pub fn api_key(&self) -> &str {
        match self {
            Configuration::Direct { api_key, .. } => api_key,
            Configuration::SharedLink { api_key, .. } => api_key,
        }
    }

    /// Returns the key under which the snippet list is cached.
    pub fn cache_key(&self) -> &str {
        match self {
            Configuration::Direct { project_id, .. } => project_id,
            Configuration::SharedLink { shared_id, .. } => shared_id,
        }
    }

    /// Returns true for shared-link configurations.
    pub fn is_shared(&self) -> bool {
        matches!(self, Configuration::SharedLink { .. })
    }

    /// Checks that every required field is present and well formed.
    pub fn validate(&self) -> ValidationResult<()> {
        match self {
            Configuration::Direct {
                organization_id,
                project_id,
                api_key,
            } => {
                validate_identifier("organization_id", organization_id)?;
                validate_identifier("project_id", project_id)?;
                validate_api_key(api_key)
            }
            Configuration::SharedLink { shared_id, api_key } => {
                validate_identifier("shared_id", shared_id)?;
                validate_api_key(api_key)
            }
        }
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Configuration::Direct {
                organization_id,
                project_id,
                ..
            } => write!(f, "direct({}/{})", organization_id, project_id),
            Configuration::SharedLink { shared_id, .. } => write!(f, "shared({})", shared_id),
        }
    }
}

// =============================================================================
// Snippet
// =============================================================================

/// Where a snippet's content lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ContentTarget {
    /// Content type (e.g., "url", "html", "component").
    #[serde(rename = "type")]
    pub kind: String,

    /// Reference resolved by the rendering layer.
    pub value: String,
}

/// A single addressable unit of remote content.
///
/// Identity is `id`. Fields the SDK does not know about are kept in `extra`
/// so that cached lists round-trip without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Snippet {
    /// Unique identifier within the project.
    pub id: String,

    /// Arbitrary properties supplied by the project author.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[ts(type = "Record<string, unknown>")]
    pub props: BTreeMap<String, Value>,

    /// Content reference handed to the rendering layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ContentTarget>,

    /// Whether the snippet should be shown.
    #[serde(default = "default_visible", skip_serializing_if = "is_true")]
    pub visible: bool,

    /// Unrecognized fields.
    #[serde(flatten)]
    #[ts(skip)]
    pub extra: BTreeMap<String, Value>,
}

fn default_visible() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

impl Snippet {
    /// Creates a visible snippet with no properties.
    pub fn new(id: impl Into<String>) -> Self {
        Snippet {
            id: id.into(),
            props: BTreeMap::new(),
            target: None,
            visible: true,
            extra: BTreeMap::new(),
        }
    }

    /// Adds a property (builder style).
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Returns a property value.
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

// =============================================================================
// Project Snapshot
// =============================================================================

/// The full set of snippets returned by one successful load.
///
/// Immutable once built: refreshes produce a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProjectSnapshot {
    /// Snippets in server order.
    pub snippets: Vec<Snippet>,

    /// Server-declared response time.
    #[ts(as = "String")]
    pub fetched_at: DateTime<Utc>,

    /// Identifier resolved from a shared link (shared loads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_snippet_id: Option<String>,
}

impl ProjectSnapshot {
    /// Creates a snapshot.
    pub fn new(snippets: Vec<Snippet>, fetched_at: DateTime<Utc>) -> Self {
        ProjectSnapshot {
            snippets,
            fetched_at,
            shared_snippet_id: None,
        }
    }

    /// Attaches the shared-link identifier (builder style).
    pub fn with_shared_snippet_id(mut self, id: impl Into<String>) -> Self {
        self.shared_snippet_id = Some(id.into());
        self
    }

    /// Finds a snippet by id.
    pub fn get(&self, id: &str) -> Option<&Snippet> {
        self.snippets.iter().find(|s| s.id == id)
    }

    /// Returns the visible snippets.
    pub fn visible(&self) -> impl Iterator<Item = &Snippet> {
        self.snippets.iter().filter(|s| s.visible)
    }

    /// Returns the snippet count.
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// Returns true if there are no snippets.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Returns true if `self` was produced after `other`.
    pub fn is_newer_than(&self, other: &ProjectSnapshot) -> bool {
        self.fetched_at > other.fetched_at
    }

    /// Returns a copy sorted by a consumer-chosen key in `props`.
    ///
    /// Numbers sort numerically, strings lexically; snippets lacking the key
    /// keep their relative order after the ones that have it.
    pub fn sorted_by_prop(&self, key: &str) -> ProjectSnapshot {
        let mut snippets = self.snippets.clone();
        snippets.sort_by(|a, b| compare_props(a.prop(key), b.prop(key)));
        ProjectSnapshot {
            snippets,
            fetched_at: self.fetched_at,
            shared_snippet_id: self.shared_snippet_id.clone(),
        }
    }

    /// Checks that snippet ids are unique.
    pub fn check_unique_ids(&self) -> Result<(), crate::CoreError> {
        let mut seen = std::collections::HashSet::new();
        for snippet in &self.snippets {
            if !seen.insert(snippet.id.as_str()) {
                return Err(crate::CoreError::DuplicateSnippet(snippet.id.clone()));
            }
        }
        Ok(())
    }
}

fn compare_props(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::MAX);
            let y = y.as_f64().unwrap_or(f64::MAX);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Access and refresh tokens, each absent until first acquired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Short-lived bearer token.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Long-lived token exchanged for access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Credentials {
    /// Empty credentials.
    pub fn empty() -> Self {
        Credentials::default()
    }

    /// Returns true if neither token is present.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

// =============================================================================
// Network Status
// =============================================================================

/// Device network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Connected,
    Disconnected,
}

impl NetworkStatus {
    /// Returns true when connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, NetworkStatus::Connected)
    }
}

impl From<bool> for NetworkStatus {
    fn from(connected: bool) -> Self {
        if connected {
            NetworkStatus::Connected
        } else {
            NetworkStatus::Disconnected
        }
    }
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Connected => write!(f, "connected"),
            NetworkStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl TryFrom<&str> for NetworkStatus {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "connected" => Ok(NetworkStatus::Connected),
            "disconnected" => Ok(NetworkStatus::Disconnected),
            other => Err(ValidationError::InvalidFormat {
                field: "network_status".to_string(),
                reason: format!("unknown status '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_configuration_cache_key() {
        let direct = Configuration::direct("acme", "site1", "k");
        assert_eq!(direct.cache_key(), "site1");
        assert_eq!(direct.api_key(), "k");
        assert!(!direct.is_shared());

        let shared = Configuration::shared_link("xyz", "k");
        assert_eq!(shared.cache_key(), "xyz");
        assert!(shared.is_shared());
    }

    #[test]
    fn test_configuration_toml_shape() {
        let json = serde_json::to_value(Configuration::shared_link("xyz", "k")).unwrap();
        assert_eq!(json, json!({"kind": "shared_link", "shared_id": "xyz", "api_key": "k"}));
    }

    #[test]
    fn test_configuration_validation() {
        assert!(Configuration::direct("acme", "site1", "k").validate().is_ok());
        assert!(Configuration::direct("", "site1", "k").validate().is_err());
        assert!(Configuration::direct("acme", "site1", "").validate().is_err());
        assert!(Configuration::shared_link("  ", "k").validate().is_err());
    }

    #[test]
    fn test_snippet_minimal_json() {
        let snippet: Snippet = serde_json::from_value(json!({"id": "hero"})).unwrap();
        assert_eq!(snippet.id, "hero");
        assert!(snippet.visible);
        assert!(snippet.props.is_empty());

        // Defaults are not written back out
        assert_eq!(serde_json::to_value(&snippet).unwrap(), json!({"id": "hero"}));
    }

    #[test]
    fn test_snippet_keeps_unknown_fields() {
        let raw = json!({
            "id": "banner",
            "visible": false,
            "target": {"type": "url", "value": "https://example.com/b"},
            "props": {"order": 2},
            "layout": "wide"
        });
        let snippet: Snippet = serde_json::from_value(raw.clone()).unwrap();
        assert!(!snippet.visible);
        assert_eq!(snippet.extra.get("layout"), Some(&json!("wide")));
        assert_eq!(serde_json::to_value(&snippet).unwrap(), raw);
    }

    #[test]
    fn test_sorted_by_prop() {
        let snapshot = ProjectSnapshot::new(
            vec![
                Snippet::new("c").with_prop("order", 3),
                Snippet::new("none"),
                Snippet::new("a").with_prop("order", 1),
                Snippet::new("b").with_prop("order", 2),
            ],
            at(0),
        );
        let ids: Vec<_> = snapshot
            .sorted_by_prop("order")
            .snippets
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "none"]);
    }

    #[test]
    fn test_snapshot_recency() {
        let older = ProjectSnapshot::new(vec![], at(10));
        let newer = ProjectSnapshot::new(vec![], at(20));
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
    }

    #[test]
    fn test_duplicate_ids_detected() {
        let snapshot = ProjectSnapshot::new(vec![Snippet::new("x"), Snippet::new("x")], at(0));
        assert!(snapshot.check_unique_ids().is_err());
    }

    #[test]
    fn test_network_status_conversions() {
        assert_eq!(NetworkStatus::from(true), NetworkStatus::Connected);
        assert_eq!(NetworkStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(
            NetworkStatus::try_from("connected").unwrap(),
            NetworkStatus::Connected
        );
        assert!(NetworkStatus::try_from("maybe").is_err());
    }

    #[test]
    fn test_credentials_wire_format() {
        let creds = Credentials {
            access_token: Some("a".into()),
            refresh_token: None,
        };
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json, json!({"accessToken": "a", "refreshToken": null}));
        assert!(Credentials::empty().is_empty());
    }
}
