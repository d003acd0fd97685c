//! # SDK Configuration
//!
//! Configuration management for the snippet engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SNIPPET_API_KEY=pk_live_123                                        │
//! │     SNIPPET_PROJECT_ID=site1                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/snippet-sdk/sdk.toml (Linux)                             │
//! │     ~/Library/Application Support/dev.snippet.snippet-sdk/sdk.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     localhost endpoints, login strategy, auto-generated device id      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sdk.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//!
//! [project]
//! kind = "direct"            # direct | shared_link
//! organization_id = "acme"
//! project_id = "site1"
//! api_key = "pk_live_123"
//!
//! [api]
//! base_url = "https://api.example.com/v1"
//! auth_url = "https://auth.example.com"
//! request_timeout_secs = 15
//!
//! [auth]
//! strategy = "login"         # login | register
//!
//! [cache]
//! tag = "default"
//!
//! [connectivity]
//! probe_interval_secs = 10
//!
//! [push]
//! url = "wss://push.example.com/snippets"
//! ```

use serde::{Deserialize, Serialize};
use snippet_core::validation::validate_tag;
use snippet_core::Configuration;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Installation identifier sent on registration (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
        }
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// Backend endpoints and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the snippet endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL of the authentication endpoints.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_auth_url() -> String {
    "http://localhost:8080/auth".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            auth_url: default_auth_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Auth Settings
// =============================================================================

/// How the SDK obtains access tokens.
///
/// ```text
/// LOGIN (Default)                         REGISTER
/// ───────────────                         ────────
/// refresh token ──login──► access token   register ──► token used as bearer
/// rejected? register, then login again    no login round trip
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    /// Exchange a refresh token for short-lived access tokens.
    #[default]
    Login,

    /// Use the registration token directly.
    Register,
}

impl std::fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::Login => write!(f, "login"),
            AuthStrategy::Register => write!(f, "register"),
        }
    }
}

impl std::str::FromStr for AuthStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "login" => Ok(AuthStrategy::Login),
            "register" | "registration" => Ok(AuthStrategy::Register),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown auth strategy: '{}'. Valid options: login, register",
                other
            ))),
        }
    }
}

/// Credential settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub strategy: AuthStrategy,

    /// Where tokens are persisted. Defaults to the platform data directory.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Snapshot cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Namespace directory under the cache root.
    #[serde(default = "default_cache_tag")]
    pub tag: String,

    /// Cache root. Defaults to the platform cache directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_cache_tag() -> String {
    "default".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            tag: default_cache_tag(),
            dir: None,
        }
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// `host:port` probed with a TCP connect.
    /// Defaults to the host of `api.base_url`.
    #[serde(default)]
    pub probe_addr: Option<String>,

    /// Interval between probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Probe connect timeout (milliseconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    2000
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_addr: None,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

// =============================================================================
// Push Settings
// =============================================================================

/// Push channel settings. No URL means no push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    /// WebSocket URL of the update channel.
    #[serde(default)]
    pub url: Option<String>,

    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Interval between keep-alive pings (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

impl Default for PushSettings {
    fn default() -> Self {
        PushSettings {
            url: None,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

// =============================================================================
// Main SDK Configuration
// =============================================================================

/// Complete SDK configuration.
///
/// ## Example Config File
/// ```toml
/// [project]
/// kind = "shared_link"
/// shared_id = "xyz"
/// api_key = "pk_live_123"
///
/// [api]
/// base_url = "https://api.example.com/v1"
///
/// [cache]
/// tag = "preview"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    /// Which project to load. Required before the engine can be built.
    #[serde(default)]
    pub project: Option<Configuration>,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub push: PushSettings,
}

impl SdkConfig {
    /// Creates a config for one project with default settings.
    pub fn new(project: Configuration) -> Self {
        SdkConfig {
            project: Some(project),
            ..Self::default()
        }
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sdk.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading SDK config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses configuration from a TOML string without env overrides.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load SDK config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "SDK config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        match &self.project {
            Some(project) => project.validate()?,
            None => {
                return Err(SyncError::InvalidConfig(
                    "[project] section is required".into(),
                ))
            }
        }

        for (field, value) in [("api.base_url", &self.api.base_url), ("api.auth_url", &self.api.auth_url)] {
            let url = Url::parse(value)
                .map_err(|e| SyncError::InvalidUrl(format!("{}: {}", field, e)))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "{} must start with http:// or https://, got: {}",
                    field, value
                )));
            }
        }

        if let Some(ref url) = self.push.url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(SyncError::InvalidUrl(format!(
                    "Push URL must start with ws:// or wss://, got: {}",
                    url
                )));
            }
        }

        validate_tag(&self.cache.tag)?;

        if self.api.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.connectivity.probe_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("SNIPPET_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("SNIPPET_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Ok(url) = std::env::var("SNIPPET_AUTH_URL") {
            debug!(url = %url, "Overriding auth URL from environment");
            self.api.auth_url = url;
        }

        if let Ok(url) = std::env::var("SNIPPET_PUSH_URL") {
            debug!(url = %url, "Overriding push URL from environment");
            self.push.url = Some(url);
        }

        if let Ok(tag) = std::env::var("SNIPPET_CACHE_TAG") {
            self.cache.tag = tag;
        }

        self.project = merge_project_env(
            self.project.take(),
            ProjectEnv {
                api_key: std::env::var("SNIPPET_API_KEY").ok(),
                organization_id: std::env::var("SNIPPET_ORGANIZATION_ID").ok(),
                project_id: std::env::var("SNIPPET_PROJECT_ID").ok(),
                shared_id: std::env::var("SNIPPET_SHARED_ID").ok(),
            },
        );
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sdk.toml"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "snippet", "snippet-sdk")
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the project configuration.
    pub fn project(&self) -> SyncResult<&Configuration> {
        self.project
            .as_ref()
            .ok_or_else(|| SyncError::InvalidConfig("[project] section is required".into()))
    }

    /// Resolved credentials file path.
    pub fn credentials_path(&self) -> PathBuf {
        self.auth.credentials_path.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| std::env::temp_dir().join("snippet-sdk"))
                .join("credentials.json")
        })
    }

    /// Resolved cache root directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.cache_dir().join("snapshots"))
                .unwrap_or_else(|| std::env::temp_dir().join("snippet-sdk").join("snapshots"))
        })
    }

    /// Resolved `host:port` for the reachability probe.
    pub fn probe_addr(&self) -> SyncResult<String> {
        if let Some(ref addr) = self.connectivity.probe_addr {
            return Ok(addr.clone());
        }
        let url = Url::parse(&self.api.base_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| SyncError::InvalidUrl(format!("no host in {}", self.api.base_url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| SyncError::InvalidUrl(format!("no port for {}", self.api.base_url)))?;
        Ok(format!("{}:{}", host, port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_secs)
    }
}

// =============================================================================
// Environment Merging
// =============================================================================

struct ProjectEnv {
    api_key: Option<String>,
    organization_id: Option<String>,
    project_id: Option<String>,
    shared_id: Option<String>,
}

/// Overlays project variables on the file configuration.
///
/// `SNIPPET_SHARED_ID` selects a shared link; `SNIPPET_ORGANIZATION_ID` or
/// `SNIPPET_PROJECT_ID` select a direct project. Missing fields are taken
/// from the file configuration when the variant matches.
fn merge_project_env(current: Option<Configuration>, env: ProjectEnv) -> Option<Configuration> {
    let current_key = current.as_ref().map(|c| c.api_key().to_string());

    if let Some(shared_id) = env.shared_id {
        debug!(shared_id = %shared_id, "Using shared link from environment");
        let api_key = env.api_key.or(current_key).unwrap_or_default();
        return Some(Configuration::shared_link(shared_id, api_key));
    }

    if env.organization_id.is_some() || env.project_id.is_some() {
        let (org, proj) = match &current {
            Some(Configuration::Direct {
                organization_id,
                project_id,
                ..
            }) => (Some(organization_id.clone()), Some(project_id.clone())),
            _ => (None, None),
        };
        let api_key = env.api_key.or(current_key).unwrap_or_default();
        return Some(Configuration::direct(
            env.organization_id.or(org).unwrap_or_default(),
            env.project_id.or(proj).unwrap_or_default(),
            api_key,
        ));
    }

    match (current, env.api_key) {
        (Some(Configuration::Direct {
            organization_id,
            project_id,
            ..
        }), Some(key)) => Some(Configuration::direct(organization_id, project_id, key)),
        (Some(Configuration::SharedLink { shared_id, .. }), Some(key)) => {
            Some(Configuration::shared_link(shared_id, key))
        }
        (current, _) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_env() -> ProjectEnv {
        ProjectEnv {
            api_key: None,
            organization_id: None,
            project_id: None,
            shared_id: None,
        }
    }

    #[test]
    fn test_auth_strategy_parsing() {
        assert_eq!("login".parse::<AuthStrategy>().unwrap(), AuthStrategy::Login);
        assert_eq!("Register".parse::<AuthStrategy>().unwrap(), AuthStrategy::Register);
        assert!("oauth".parse::<AuthStrategy>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SdkConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.auth.strategy, AuthStrategy::Login);
        assert_eq!(config.cache.tag, "default");
        assert!(config.push.url.is_none());
    }

    #[test]
    fn test_config_validation() {
        // Missing project fails fast
        assert!(SdkConfig::default().validate().is_err());

        let mut config = SdkConfig::new(Configuration::direct("acme", "site1", "k"));
        assert!(config.validate().is_ok());

        config.push.url = Some("http://invalid".to_string());
        assert!(config.validate().is_err());

        config.push.url = Some("wss://push.example.com".to_string());
        assert!(config.validate().is_ok());

        config.api.base_url = "not a url".to_string();
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_empty_project_id_rejected() {
        let config = SdkConfig::new(Configuration::direct("acme", "", "k"));
        assert!(matches!(config.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_from_toml_with_tagged_project() {
        let config = SdkConfig::from_toml(
            r#"
            [project]
            kind = "shared_link"
            shared_id = "xyz"
            api_key = "k"

            [cache]
            tag = "preview"
            "#,
        )
        .unwrap();
        assert_eq!(config.project, Some(Configuration::shared_link("xyz", "k")));
        assert_eq!(config.cache.tag, "preview");
        assert_eq!(config.api.request_timeout_secs, 15);
    }

    #[test]
    fn test_toml_serialization() {
        let config = SdkConfig::new(Configuration::direct("acme", "site1", "k"));
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[project]"));
        assert!(toml_str.contains("kind = \"direct\""));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sdk.toml");

        let config = SdkConfig::new(Configuration::direct("acme", "site1", "k"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded = SdkConfig::from_toml(&contents).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
        assert_eq!(loaded.project, config.project);
    }

    #[test]
    fn test_probe_addr_derived_from_base_url() {
        let mut config = SdkConfig::new(Configuration::direct("acme", "site1", "k"));
        config.api.base_url = "https://api.example.com/v1".to_string();
        assert_eq!(config.probe_addr().unwrap(), "api.example.com:443");

        config.connectivity.probe_addr = Some("10.0.0.1:53".to_string());
        assert_eq!(config.probe_addr().unwrap(), "10.0.0.1:53");
    }

    #[test]
    fn test_env_shared_id_switches_variant() {
        let current = Some(Configuration::direct("acme", "site1", "file-key"));
        let merged = merge_project_env(
            current,
            ProjectEnv {
                shared_id: Some("xyz".into()),
                ..empty_env()
            },
        );
        assert_eq!(merged, Some(Configuration::shared_link("xyz", "file-key")));
    }

    #[test]
    fn test_env_overrides_single_field() {
        let current = Some(Configuration::direct("acme", "site1", "file-key"));
        let merged = merge_project_env(
            current,
            ProjectEnv {
                project_id: Some("site2".into()),
                api_key: Some("env-key".into()),
                ..empty_env()
            },
        );
        assert_eq!(merged, Some(Configuration::direct("acme", "site2", "env-key")));
    }

    #[test]
    fn test_env_absent_keeps_file_project() {
        let current = Some(Configuration::shared_link("xyz", "k"));
        assert_eq!(merge_project_env(current.clone(), empty_env()), current);
        assert_eq!(merge_project_env(None, empty_env()), None);
    }
}
