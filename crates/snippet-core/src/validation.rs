//! # Validation Module
//!
//! Input validation for embedder-supplied configuration.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  └── Shape of the TOML/JSON input                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Required fields, lengths, characters                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Engine construction                                          │
//! │  └── Refuses to build with an invalid Configuration (fail fast)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use snippet_core::validation::validate_identifier;
//!
//! assert!(validate_identifier("project_id", "site1").is_ok());
//! assert!(validate_identifier("project_id", "").is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_API_KEY_LEN, MAX_IDENTIFIER_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an identifier used in request paths and cache file names.
///
/// ## Rules
/// - Must not be empty (after trimming)
/// - At most 128 characters
/// - No whitespace, `/`, `\` or `..`
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    if value.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') || value.contains("..") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace, path separators or '..'".to_string(),
        });
    }

    Ok(())
}

/// Validates an API key.
///
/// ## Rules
/// - Must not be empty
/// - At most 512 characters
/// - Printable ASCII only (it travels in an HTTP header)
pub fn validate_api_key(value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "api_key".to_string(),
        });
    }

    if value.len() > MAX_API_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "api_key".to_string(),
            max: MAX_API_KEY_LEN,
        });
    }

    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidFormat {
            field: "api_key".to_string(),
            reason: "must be printable ASCII without spaces".to_string(),
        });
    }

    Ok(())
}

/// Validates a cache namespace tag.
pub fn validate_tag(value: &str) -> ValidationResult<()> {
    validate_identifier("cache.tag", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("id", "site-1_A").is_ok());
        assert!(matches!(
            validate_identifier("id", "   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_identifier("id", &"x".repeat(200)),
            Err(ValidationError::TooLong { max: 128, .. })
        ));
        assert!(validate_identifier("id", "a/b").is_err());
        assert!(validate_identifier("id", "..").is_err());
        assert!(validate_identifier("id", "a b").is_err());
    }

    #[test]
    fn test_api_key_rules() {
        assert!(validate_api_key("pk_live_123").is_ok());
        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("has space").is_err());
        assert!(validate_api_key("naïve").is_err());
    }

    #[test]
    fn test_tag_rules() {
        assert!(validate_tag("default").is_ok());
        assert!(validate_tag("../escape").is_err());
    }
}
