//! # Error Types
//!
//! Domain-specific error types for snippet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  snippet-core errors (this file)                                       │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  snippet-sync errors (separate crate)                                  │
//! │  └── SyncError        - Network, auth, cache, config failures          │
//! │                                                                         │
//! │  Outcome stream (what subscribers see)                                 │
//! │  └── Failure          - Serializable cause inside Outcome::Error       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → Failure → Subscriber  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (field names, IDs)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Snippet cannot be found in a snapshot.
    #[error("Snippet not found: {0}")]
    SnippetNotFound(String),

    /// The same snippet id appears more than once in a snapshot.
    ///
    /// ## When This Occurs
    /// - Backend returned a malformed project definition
    /// - A cached list was written by an incompatible SDK version
    #[error("Duplicate snippet id: {0}")]
    DuplicateSnippet(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised when an embedder supplies a configuration that cannot work.
/// These are caught at construction time, never at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., whitespace or path separators in an identifier).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
