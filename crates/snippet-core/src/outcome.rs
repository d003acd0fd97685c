//! # Outcome
//!
//! The value delivered to subscribers of the synchronization engine.
//!
//! ## Stale-While-Revalidate Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Outcome Lifecycle                                │
//! │                                                                         │
//! │   subscribe                                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   Progress { data: cached? }   ← UI shows cached content immediately    │
//! │       │                                                                 │
//! │       ├── load ok ──►  Success { data: fresh }                          │
//! │       │                                                                 │
//! │       └── load err ─►  Error { data: last known?, cause }               │
//! │                                                                         │
//! │   Any trigger (reconnect, push, manual) starts a new Progress.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Failure
// =============================================================================

/// Category of a failed load, as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, reset, timed out.
    Network,
    /// The device reported no connectivity; nothing was attempted.
    Offline,
    /// Credentials were rejected even after renewal.
    Authentication,
    /// Backend answered with a non-success status.
    Server,
    /// Backend answered with a body the SDK cannot read.
    MalformedResponse,
    /// Embedder configuration problem.
    Configuration,
    /// Unexpected SDK failure.
    Internal,
}

/// Serializable cause carried by [`Outcome::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status, when the backend answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Whether a later trigger may succeed without intervention.
    pub retryable: bool,
}

impl Failure {
    /// Creates a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>, retryable: bool) -> Self {
        Failure {
            kind,
            message: message.into(),
            status: None,
            retryable,
        }
    }

    /// Attaches an HTTP status (builder style).
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of a synchronization step.
///
/// `Progress` and `Error` may carry stale data so the UI can keep showing
/// content while a refresh is in flight or after it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// A load is in flight; `data` is the last known value, if any.
    Progress { data: Option<T> },

    /// The most recent load succeeded.
    Success { data: T },

    /// The most recent load failed; `data` is the last known value, if any.
    Error { data: Option<T>, cause: Failure },
}

impl<T> Outcome<T> {
    /// Returns the carried data, fresh or stale.
    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Progress { data } => data.as_ref(),
            Outcome::Success { data } => Some(data),
            Outcome::Error { data, .. } => data.as_ref(),
        }
    }

    /// Consumes the outcome and returns the carried data.
    pub fn into_data(self) -> Option<T> {
        match self {
            Outcome::Progress { data } => data,
            Outcome::Success { data } => Some(data),
            Outcome::Error { data, .. } => data,
        }
    }

    /// Returns the failure cause for `Error` outcomes.
    pub fn cause(&self) -> Option<&Failure> {
        match self {
            Outcome::Error { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn is_progress(&self) -> bool {
        matches!(self, Outcome::Progress { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    /// Projects the payload while keeping the tag.
    ///
    /// ```rust
    /// use snippet_core::Outcome;
    ///
    /// let outcome: Outcome<Vec<u32>> = Outcome::Progress { data: Some(vec![3, 1, 2]) };
    /// let sorted = outcome.map_data(|mut v| { v.sort(); v });
    /// assert_eq!(sorted, Outcome::Progress { data: Some(vec![1, 2, 3]) });
    /// ```
    pub fn map_data<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Progress { data } => Outcome::Progress { data: data.map(f) },
            Outcome::Success { data } => Outcome::Success { data: f(data) },
            Outcome::Error { data, cause } => Outcome::Error {
                data: data.map(f),
                cause,
            },
        }
    }

    /// The phase a subscriber is in after receiving this outcome.
    pub fn phase(&self) -> SyncPhase {
        match self {
            Outcome::Progress { .. } => SyncPhase::Loading,
            Outcome::Success { .. } => SyncPhase::Fresh,
            Outcome::Error { data: Some(_), .. } => SyncPhase::Stale,
            Outcome::Error { data: None, .. } => SyncPhase::Failed,
        }
    }
}

// =============================================================================
// Sync Phase
// =============================================================================

/// Engine state for one subscription lifetime.
///
/// ```text
/// Idle ──► Loading ──► Fresh | Stale | Failed
///             ▲                  │
///             └──── trigger ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No active subscription.
    #[default]
    Idle,
    /// A load is in flight.
    Loading,
    /// The last load succeeded.
    Fresh,
    /// The last load failed; stale data is being served.
    Stale,
    /// The last load failed and there is nothing to show.
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Loading => write!(f, "loading"),
            SyncPhase::Fresh => write!(f, "fresh"),
            SyncPhase::Stale => write!(f, "stale"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> Failure {
        Failure::new(FailureKind::Offline, "no network", true)
    }

    #[test]
    fn test_map_data_preserves_tag() {
        let progress: Outcome<i32> = Outcome::Progress { data: None };
        assert_eq!(progress.map_data(|v| v * 2), Outcome::Progress { data: None });

        let success = Outcome::Success { data: 21 };
        assert_eq!(success.map_data(|v| v * 2), Outcome::Success { data: 42 });

        let error = Outcome::Error {
            data: Some(1),
            cause: offline(),
        };
        match error.map_data(|v| v.to_string()) {
            Outcome::Error { data, cause } => {
                assert_eq!(data.as_deref(), Some("1"));
                assert_eq!(cause.kind, FailureKind::Offline);
            }
            other => panic!("tag changed: {:?}", other),
        }
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(Outcome::<i32>::Progress { data: Some(1) }.phase(), SyncPhase::Loading);
        assert_eq!(Outcome::Success { data: 1 }.phase(), SyncPhase::Fresh);
        assert_eq!(
            Outcome::Error { data: Some(1), cause: offline() }.phase(),
            SyncPhase::Stale
        );
        assert_eq!(
            Outcome::<i32>::Error { data: None, cause: offline() }.phase(),
            SyncPhase::Failed
        );
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(Outcome::Success { data: 5 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "success", "data": 5}));
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(FailureKind::Server, "not found", false).with_status(404);
        assert_eq!(failure.to_string(), "Server (404): not found");
    }
}
