//! Request Correlation Types
//!
//! Value types shared by the tracker, the session runtime and the workflows:
//! request ids, filed operations and the error responses the gateway sends.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Request Id
// =============================================================================

/// Correlation key assigned to every outbound request.
///
/// The starting value is supplied by the gateway during the handshake and the
/// session increments it locally. Negative ids on the wire mean "not tied to a
/// request" and are never turned into a `RequestId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i64);

impl RequestId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Interpret a wire id, mapping negative values to `None`.
    #[must_use]
    pub const fn from_wire(raw: i64) -> Option<Self> {
        if raw < 0 { None } else { Some(Self(raw)) }
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RequestId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

// =============================================================================
// Error Response
// =============================================================================

/// An error (or informational notice) reported by the gateway, or filed
/// locally by a workflow against one of its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Request the error refers to, if any.
    pub request_id: Option<RequestId>,
    /// Numeric error code.
    pub code: i32,
    /// Human readable message.
    pub message: String,
    /// Advanced order-reject payload (JSON text), when the gateway sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_reject: Option<String>,
    /// When the error was received or filed.
    pub received_at: DateTime<Utc>,
}

impl ErrorResponse {
    /// Create an error response stamped with the current time.
    #[must_use]
    pub fn new(request_id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            request_id,
            code,
            message: message.into(),
            advanced_reject: None,
            received_at: Utc::now(),
        }
    }

    /// Attach an advanced order-reject payload. Empty payloads are dropped.
    #[must_use]
    pub fn with_advanced_reject(mut self, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        self.advanced_reject = if payload.is_empty() {
            None
        } else {
            Some(payload)
        };
        self
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.request_id {
            Some(id) => write!(f, "[{id}] {}: {}", self.code, self.message),
            None => write!(f, "[-] {}: {}", self.code, self.message),
        }
    }
}

// =============================================================================
// Pending Operation
// =============================================================================

/// Terminal outcome of a filed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Retired by an end marker or a single-shot acknowledgement.
    Success {
        /// When the terminal signal arrived.
        completed_at: DateTime<Utc>,
    },
    /// Retired by an error for this id.
    Error(ErrorResponse),
}

/// A request that was sent to the gateway and the state of its exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Correlation id.
    pub request_id: RequestId,
    /// When the request was filed.
    pub issued_at: DateTime<Utc>,
    /// Name of the operation that issued it.
    pub operation: String,
    /// Serialized outbound request.
    pub payload: String,
    /// Number of partial responses received before the terminal signal.
    pub fragments: usize,
    /// `None` while pending.
    pub outcome: Option<TerminalOutcome>,
}

impl PendingOperation {
    /// File a new operation.
    #[must_use]
    pub fn new(request_id: RequestId, operation: impl Into<String>, payload: String) -> Self {
        Self {
            request_id,
            issued_at: Utc::now(),
            operation: operation.into(),
            payload,
            fragments: 0,
            outcome: None,
        }
    }

    /// The error that retired this operation, if it failed.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorResponse> {
        match &self.outcome {
            Some(TerminalOutcome::Error(e)) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_wire_ids_are_not_requests() {
        assert_eq!(RequestId::from_wire(-1), None);
        assert_eq!(RequestId::from_wire(0), Some(RequestId::new(0)));
        assert_eq!(RequestId::from_wire(42).map(RequestId::value), Some(42));
    }

    #[test]
    fn empty_advanced_reject_is_dropped() {
        let err = ErrorResponse::new(Some(RequestId::new(3)), 201, "rejected").with_advanced_reject("");
        assert!(err.advanced_reject.is_none());

        let err = err.with_advanced_reject("{\"reason\":\"margin\"}");
        assert_eq!(err.advanced_reject.as_deref(), Some("{\"reason\":\"margin\"}"));
    }

    #[test]
    fn error_response_display() {
        let attached = ErrorResponse::new(Some(RequestId::new(7)), 200, "No security definition");
        assert_eq!(attached.to_string(), "[7] 200: No security definition");

        let unattached = ErrorResponse::new(None, 502, "Couldn't connect");
        assert_eq!(unattached.to_string(), "[-] 502: Couldn't connect");
    }

    #[test]
    fn pending_operation_starts_without_outcome() {
        let op = PendingOperation::new(RequestId::new(1), "contract_details", "{}".to_string());
        assert!(op.outcome.is_none());
        assert!(op.error().is_none());
        assert_eq!(op.fragments, 0);
    }
}
