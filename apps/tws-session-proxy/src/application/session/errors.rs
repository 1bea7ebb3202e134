//! Gateway Error Classification and Session Errors
//!
//! Every gateway error code falls into exactly one class. The table is fixed.
//!
//! | Class              | Codes                | Effect                           |
//! |--------------------|----------------------|----------------------------------|
//! | `Ignored`          | 2104, 2106, 2158     | logged at debug, not filed       |
//! | `TransportSevered` | 502, 504             | filed, session stops             |
//! | `SessionDead`      | 2110                 | filed, session stops             |
//! | `Informational`    | 399                  | filed as info, nothing retired   |
//! | `Request`          | everything else      | filed against the request id     |

use thiserror::Error;

use crate::application::ports::{SinkError, TransportError};
use crate::domain::tracker::{INFO_ONLY_CODES, TrackerError};

/// Data-farm "connection is OK" notices.
pub const IGNORED_CODES: &[i32] = &[2104, 2106, 2158];

/// Couldn't connect / not connected.
pub const TRANSPORT_SEVERED_CODES: &[i32] = &[502, 504];

/// Connectivity between the gateway and the server is broken.
pub const SESSION_DEAD_CODES: &[i32] = &[2110];

/// Class of a gateway error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Benign notice; dropped.
    Ignored,
    /// The transport was severed; stop immediately.
    TransportSevered,
    /// The gateway declared the session dead; stop immediately.
    SessionDead,
    /// Filed separately; never a failure.
    Informational,
    /// Filed against the request it names.
    Request,
}

impl ErrorClass {
    /// Classify a gateway error code.
    #[must_use]
    pub fn of(code: i32) -> Self {
        if IGNORED_CODES.contains(&code) {
            Self::Ignored
        } else if TRANSPORT_SEVERED_CODES.contains(&code) {
            Self::TransportSevered
        } else if SESSION_DEAD_CODES.contains(&code) {
            Self::SessionDead
        } else if INFO_ONLY_CODES.contains(&code) {
            Self::Informational
        } else {
            Self::Request
        }
    }

    /// Whether errors of this class end the session.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::TransportSevered | Self::SessionDead)
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::TransportSevered => "transport_severed",
            Self::SessionDead => "session_dead",
            Self::Informational => "informational",
            Self::Request => "request",
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// An internal invariant violation. Ends the session and is surfaced by
/// `wait_for_completion`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    /// The tracker rejected a call.
    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),

    /// A response made no sense for the requests filed so far.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Errors returned by the session proxy's public API.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not connect.
    #[error("failed to connect to gateway: {0}")]
    Connect(#[source] TransportError),

    /// `activate` was called twice.
    #[error("session already activated")]
    AlreadyActivated,

    /// `wait_for_completion` was called before `activate`.
    #[error("session not activated")]
    NotActivated,

    /// The session ended on an internal invariant violation.
    #[error("session fault: {0}")]
    Fault(#[from] SessionFault),

    /// A session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),
}

/// Why a workflow could not prepare a request for a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// The target itself is unusable.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The persistence collaborator refused the pre-send record.
    #[error(transparent)]
    Sink(#[from] SinkError),
}
