//! Bridge-wide error taxonomy.
//!
//! Every error that crosses the engine boundary is one of these variants;
//! the HTTP layer maps them 1:1 to response codes. Late, duplicate or
//! unmatched transport messages are deliberately NOT represented here:
//! they are recovered locally (logged and dropped) and never surface to
//! callers.

use crate::{CorrelationId, DeviceId};

/// Convenience alias for results carrying a [`BridgeError`].
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced to callers of the bridge.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Caller error (bad device id, payload or timeout). Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The transport rejected a publish synchronously. Surfaced
    /// immediately; the engine does not retry these.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No response within the deadline after exhausting retries.
    #[error("Command {correlation_id} timed out after {attempts} attempt(s)")]
    Timeout {
        /// Correlation id of the expired command
        correlation_id: CorrelationId,
        /// Total publish attempts made (initial send + retries)
        attempts: u32,
    },

    /// State query for a device identifier that has never been observed.
    #[error("Unknown device: {0}")]
    DeviceUnknown(DeviceId),

    /// A pending result handle was resolved more than once. This is an
    /// internal invariant violation, not a normal error path: it means a
    /// bug in the correlation engine and must never be silently swallowed.
    #[error("Duplicate resolution for command {0} (internal invariant violation)")]
    DuplicateResolution(CorrelationId),
}

impl BridgeError {
    /// Whether this error indicates an internal bug rather than an
    /// operational condition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, BridgeError::DuplicateResolution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = BridgeError::Timeout {
            correlation_id: "c1".to_string(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "Command c1 timed out after 3 attempt(s)");

        let err = BridgeError::DeviceUnknown("r9".to_string());
        assert_eq!(err.to_string(), "Unknown device: r9");
    }

    #[test]
    fn test_invariant_classification() {
        assert!(BridgeError::DuplicateResolution("c1".into()).is_invariant_violation());
        assert!(!BridgeError::InvalidRequest("x".into()).is_invariant_violation());
    }
}
