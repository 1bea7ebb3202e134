//! Session lifecycle states and stop reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one gateway session.
///
/// `Created → Handshaking → Active → Draining → Stopped`. Any state may jump
/// straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, not yet activated.
    Created,
    /// Connected, waiting for both the account list and the initial id.
    Handshaking,
    /// Handshake complete; dispatch is running.
    Active,
    /// Every request dispatched; waiting for terminal responses.
    Draining,
    /// Final.
    Stopped,
}

impl SessionState {
    /// Whether outbound requests may be sent in this state.
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Active | Self::Draining)
    }

    /// Whether the session has finished.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every dispatched request reached a terminal outcome.
    Idle,
    /// The session deadline elapsed.
    DeadlineExceeded,
    /// The gateway reported the transport as severed.
    TransportSevered {
        /// Gateway error code.
        code: i32,
    },
    /// The gateway declared the session dead.
    RemoteSessionEnded {
        /// Gateway error code.
        code: i32,
    },
    /// The connection closed underneath the session.
    ConnectionClosed,
    /// The workflow had nothing to dispatch.
    NoTargets,
    /// The open-order refresh finished.
    OpenOrdersEnd,
    /// A response violated the request/response contract.
    ProtocolViolation,
    /// The dispatcher could not send a request.
    DispatchFailed,
    /// Stopped by the driving application.
    Requested,
}

impl StopReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::TransportSevered { .. } => "transport severed",
            Self::RemoteSessionEnded { .. } => "remote session ended",
            Self::ConnectionClosed => "connection closed",
            Self::NoTargets => "no targets",
            Self::OpenOrdersEnd => "open orders end",
            Self::ProtocolViolation => "protocol violation",
            Self::DispatchFailed => "dispatch failed",
            Self::Requested => "requested",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportSevered { code } | Self::RemoteSessionEnded { code } => {
                write!(f, "{} ({code})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}
