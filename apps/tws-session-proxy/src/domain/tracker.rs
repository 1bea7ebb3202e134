//! Request Tracker
//!
//! Owns request-id allocation and the pending / success / error / info
//! ledgers of one session.
//!
//! # Locking
//!
//! The tracker holds no lock of its own. Every mutating call happens while the
//! session's single lock is held.
//!
//! # Ledger Invariant
//!
//! A filed request id lives in exactly one of pending, success or error.
//! Informational notices are copies kept on the side and never retire the
//! operation they refer to.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;

use super::request::{ErrorResponse, PendingOperation, RequestId, TerminalOutcome};

// =============================================================================
// Constants
// =============================================================================

/// Codes filed as informational instead of erroneous.
pub const INFO_ONLY_CODES: &[i32] = &[399];

/// "Couldn't connect" may arrive before any request was filed; it is the one
/// code accepted for an unknown id.
pub const CONNECTION_REFUSED: i32 = 502;

// =============================================================================
// Errors
// =============================================================================

/// Tracker contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// An id was requested before the handshake supplied a starting value.
    #[error("request id requested before the gateway supplied one")]
    Uninitialized,

    /// The starting id was supplied twice.
    #[error("request ids already initialized at {current}")]
    AlreadyInitialized {
        /// Next id the tracker would hand out.
        current: RequestId,
    },

    /// A request was filed before any id was allocated.
    #[error("no request id allocated to file the request under")]
    NothingAllocated,

    /// A response or error arrived for an id that was never filed.
    #[error("response for unknown request {0}")]
    UnknownRequest(RequestId),
}

/// Where `record_error` filed an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The pending operation moved to the error ledger.
    Failed,
    /// A previously successful operation moved to the error ledger.
    LateFailure,
    /// Filed in the info ledger; the operation (if any) stays where it was.
    Informational,
    /// Connection refused with no filed request; kept as a standalone entry.
    Synthetic,
}

// =============================================================================
// Request Tracker
// =============================================================================

/// Request-id allocator and outcome ledger for one session.
#[derive(Debug, Default)]
pub struct RequestTracker {
    next: Option<RequestId>,
    last_allocated: Option<RequestId>,
    pending: BTreeMap<RequestId, PendingOperation>,
    succeeded: BTreeMap<RequestId, PendingOperation>,
    failed: BTreeMap<RequestId, PendingOperation>,
    synthetic: Vec<ErrorResponse>,
    info: Vec<ErrorResponse>,
    requests_complete: bool,
    filed: usize,
}

impl RequestTracker {
    /// Create an uninitialized tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the handshake-supplied starting id. Only the first call counts.
    pub fn initialize(&mut self, start: RequestId) -> Result<(), TrackerError> {
        if let Some(current) = self.next {
            return Err(TrackerError::AlreadyInitialized { current });
        }
        self.next = Some(start);
        Ok(())
    }

    /// Whether the starting id has been supplied.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.next.is_some()
    }

    /// Allocate the next id.
    ///
    /// Allocated ids that never get a request filed under them are simply
    /// skipped; the gateway draws from the same monotonic space.
    pub fn next_id(&mut self) -> Result<RequestId, TrackerError> {
        let id = self.next.ok_or(TrackerError::Uninitialized)?;
        self.next = Some(id.next());
        self.last_allocated = Some(id);
        Ok(id)
    }

    /// File a request under the most recently allocated id.
    ///
    /// Filing the same id twice keeps the first operation and logs a warning.
    pub fn record_request(
        &mut self,
        operation: &str,
        payload: String,
    ) -> Result<RequestId, TrackerError> {
        let id = self.last_allocated.ok_or(TrackerError::NothingAllocated)?;

        if self.pending.contains_key(&id)
            || self.succeeded.contains_key(&id)
            || self.failed.contains_key(&id)
        {
            tracing::warn!(request_id = %id, operation, "Duplicate request id, keeping first filing");
            return Ok(id);
        }

        tracing::debug!(request_id = %id, operation, "Request filed");
        self.pending
            .insert(id, PendingOperation::new(id, operation, payload));
        self.filed += 1;
        Ok(id)
    }

    /// Count a partial response against a pending operation.
    pub fn record_fragment(&mut self, id: RequestId) -> Result<(), TrackerError> {
        let op = self
            .pending
            .get_mut(&id)
            .ok_or(TrackerError::UnknownRequest(id))?;
        op.fragments += 1;
        Ok(())
    }

    /// Retire a pending operation as successful.
    pub fn record_success(&mut self, id: RequestId) -> Result<(), TrackerError> {
        let mut op = self
            .pending
            .remove(&id)
            .ok_or(TrackerError::UnknownRequest(id))?;
        op.outcome = Some(TerminalOutcome::Success {
            completed_at: Utc::now(),
        });
        tracing::debug!(request_id = %id, "Request completed");
        self.succeeded.insert(id, op);
        Ok(())
    }

    /// File an error.
    ///
    /// - Informational codes go to the info ledger and retire nothing.
    /// - A pending id moves to the error ledger.
    /// - A successful id moves to the error ledger (late rejection).
    /// - An id already in the error ledger keeps its first error.
    /// - Connection refused for an unfiled request becomes a standalone entry.
    /// - Anything else for an unfiled request is `UnknownRequest`.
    pub fn record_error(&mut self, error: ErrorResponse) -> Result<ErrorDisposition, TrackerError> {
        if INFO_ONLY_CODES.contains(&error.code) {
            tracing::info!(code = error.code, message = %error.message, "Informational response");
            self.info.push(error);
            return Ok(ErrorDisposition::Informational);
        }

        let Some(id) = error.request_id else {
            return self.record_unattached(error);
        };

        if let Some(mut op) = self.pending.remove(&id) {
            tracing::error!(request_id = %id, code = error.code, message = %error.message, "Request failed");
            op.outcome = Some(TerminalOutcome::Error(error));
            self.failed.insert(id, op);
            return Ok(ErrorDisposition::Failed);
        }

        if let Some(mut op) = self.succeeded.remove(&id) {
            tracing::error!(request_id = %id, code = error.code, message = %error.message, "Completed request rejected late");
            op.outcome = Some(TerminalOutcome::Error(error));
            self.failed.insert(id, op);
            return Ok(ErrorDisposition::LateFailure);
        }

        if self.failed.contains_key(&id) {
            tracing::warn!(request_id = %id, code = error.code, message = %error.message, "Additional error for failed request");
            return Ok(ErrorDisposition::Failed);
        }

        self.record_unattached(ErrorResponse {
            request_id: Some(id),
            ..error
        })
    }

    fn record_unattached(&mut self, error: ErrorResponse) -> Result<ErrorDisposition, TrackerError> {
        if error.code == CONNECTION_REFUSED {
            tracing::error!(code = error.code, message = %error.message, "Gateway refused the connection");
            self.synthetic.push(error);
            return Ok(ErrorDisposition::Synthetic);
        }
        match error.request_id {
            Some(id) => Err(TrackerError::UnknownRequest(id)),
            None => {
                tracing::warn!(code = error.code, message = %error.message, "Unattached gateway notice");
                self.info.push(error);
                Ok(ErrorDisposition::Informational)
            }
        }
    }

    /// Mark that the command dispatcher has sent everything it will send.
    pub const fn mark_requests_complete(&mut self) {
        self.requests_complete = true;
    }

    /// Whether the dispatcher has finished.
    #[must_use]
    pub const fn requests_complete(&self) -> bool {
        self.requests_complete
    }

    /// The session is drained: dispatch finished, nothing pending, and at least
    /// one request was ever filed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.requests_complete && self.pending.is_empty() && self.filed > 0
    }

    /// Whether `id` is awaiting a terminal signal.
    #[must_use]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Whether `id` was filed in this session, whatever its state.
    #[must_use]
    pub fn is_known(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
            || self.succeeded.contains_key(&id)
            || self.failed.contains_key(&id)
    }

    /// Whether `id` completed successfully.
    #[must_use]
    pub fn has_succeeded(&self, id: RequestId) -> bool {
        self.succeeded.contains_key(&id)
    }

    /// Whether `id` was retired by an error.
    #[must_use]
    pub fn has_failed(&self, id: RequestId) -> bool {
        self.failed.contains_key(&id)
    }

    /// Number of operations awaiting a terminal signal.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of operations ever filed.
    #[must_use]
    pub const fn filed_count(&self) -> usize {
        self.filed
    }

    /// Ids still pending, in ascending order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.keys().copied().collect()
    }

    /// Successful operations in id order.
    pub fn successes(&self) -> impl Iterator<Item = &PendingOperation> {
        self.succeeded.values()
    }

    /// Error ledger: failed operations in id order, then standalone entries.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorResponse> {
        self.failed
            .values()
            .filter_map(|op| op.error().cloned())
            .chain(self.synthetic.iter().cloned())
            .collect()
    }

    /// Info ledger in arrival order.
    #[must_use]
    pub fn info(&self) -> &[ErrorResponse] {
        &self.info
    }

    /// Log ledger sizes at debug level.
    pub fn dump(&self, context: &str) {
        tracing::debug!(
            context,
            requests_complete = self.requests_complete,
            pending = self.pending.len(),
            succeeded = self.succeeded.len(),
            failed = self.failed.len() + self.synthetic.len(),
            info = self.info.len(),
            "Tracker state"
        );
    }
}
