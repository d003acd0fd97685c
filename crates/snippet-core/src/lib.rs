//! # snippet-core: Pure Types for the Snippet SDK
//!
//! This crate holds the data model shared by the synchronization engine and
//! the UI layers that consume it. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Snippet SDK Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    UI Layer (embedder)                          │   │
//! │  │       subscribes to Outcome<ProjectSnapshot>, renders snippets  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    snippet-sync (engine)                        │   │
//! │  │       auth, remote loader, cache, connectivity, push            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ snippet-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │  outcome  │  │ validation│                  │   │
//! │  │   │  Snippet  │  │  Outcome  │  │   rules   │                  │   │
//! │  │   │  Config   │  │  Failure  │  │  checks   │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • PURE FUNCTIONS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Configuration, Snippet, ProjectSnapshot, etc.)
//! - [`outcome`] - Outcome union delivered to subscribers
//! - [`error`] - Domain error types
//! - [`validation`] - Configuration validation
//!
//! ## Example Usage
//!
//! ```rust
//! use snippet_core::{Configuration, Outcome, ProjectSnapshot, Snippet};
//! use chrono::Utc;
//!
//! let config = Configuration::direct("acme", "site1", "pk_live_1");
//! assert!(config.validate().is_ok());
//!
//! let snapshot = ProjectSnapshot::new(vec![Snippet::new("hero")], Utc::now());
//! let outcome = Outcome::Success { data: snapshot };
//! let count = outcome.map_data(|s| s.len());
//! assert_eq!(count, Outcome::Success { data: 1 });
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod outcome;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use outcome::{Failure, FailureKind, Outcome, SyncPhase};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of organization, project, shared and snippet identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Maximum length of an API key.
pub const MAX_API_KEY_LEN: usize = 512;
