//! # snippet-sync: Synchronization Engine for the Snippet SDK
//!
//! This crate fetches a remote project definition, serves it cache-first and
//! keeps it fresh in the background.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Snippet Synchronization Engine                     │
//! │                                                                         │
//! │   UI / embedder                                                         │
//! │       │  subscribe(), refresh(), shutdown()                             │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SnippetEngine                            │  │
//! │  │   Progress(cached) ──► Success(fresh) | Error(last known, cause) │  │
//! │  └──────┬──────────────┬───────────────┬───────────────┬────────────┘  │
//! │         │              │               │               │               │
//! │         ▼              ▼               ▼               ▼               │
//! │  ┌────────────┐ ┌─────────────┐ ┌─────────────┐ ┌──────────────┐       │
//! │  │  Snapshot  │ │   Remote    │ │Connectivity │ │ Push channel │       │
//! │  │   cache    │ │   loader    │ │  monitor    │ │ (WebSocket)  │       │
//! │  │ JSON files │ │   (HTTP)    │ │ (TCP probe) │ │              │       │
//! │  └────────────┘ └──────┬──────┘ └─────────────┘ └──────────────┘       │
//! │                        │                                                │
//! │                        ▼                                                │
//! │                 ┌─────────────┐     ┌──────────────────┐                │
//! │                 │   Token     │────►│ Credential store │                │
//! │                 │  authority  │     │ (credentials.json)│               │
//! │                 └─────────────┘     └──────────────────┘                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `SnippetEngine`, outcome streams, builder
//! - [`config`] - SDK configuration (project, endpoints, cache, push)
//! - [`error`] - Sync error types
//! - [`auth`] - Token authority and auth endpoints
//! - [`credentials`] - Credential persistence
//! - [`loader`] - Remote snapshot loader
//! - [`cache`] - Local snapshot cache
//! - [`connectivity`] - Reachability monitor
//! - [`push`] - WebSocket push channel with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use snippet_sync::{SdkConfig, SnippetEngine};
//!
//! let config = SdkConfig::load(None)?;
//! let engine = SnippetEngine::from_config(&config)?;
//!
//! let mut outcomes = engine.subscribe();
//! while let Some(outcome) = outcomes.next().await {
//!     println!("{}: {:?}", outcome.phase(), outcome.data().map(|s| s.len()));
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod loader;
pub mod push;

mod http;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{AuthApi, HttpAuthApi, Renewal, TokenAuthority};
pub use cache::{CacheEntry, SnapshotCache};
pub use config::{AuthStrategy, SdkConfig};
pub use connectivity::{
    ConnectivityMonitor, ManualReachability, ProbeReachability, ReachabilitySource, Registration,
    StatusSink, StatusStream,
};
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use engine::{
    ErrorReporter, OutcomeStream, SnapshotOutcome, SnippetEngine, SnippetEngineBuilder,
    TracingReporter,
};
pub use error::{SyncError, SyncResult};
pub use http::{build_client, API_KEY_HEADER};
pub use loader::{HttpRemoteLoader, SnapshotLoader};
pub use push::{PushChannel, PushConfig, PushEvent, PushHandle, PushStatus};
