#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements
    )
)]

//! TWS Session Proxy - Gateway Session Runtime
//!
//! Drives one session against a TWS / IB Gateway: connects, waits for the
//! two-signal handshake (managed accounts + next valid id), dispatches a
//! batch of contract lookups or order placements, correlates the streamed
//! responses by request id and stops on idle, deadline or a fatal error.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Request correlation and value types
//!   - `tracker`: request-id allocation and outcome ledgers
//!   - `accumulator`: partial response buffering
//!   - `contract` / `order`: what is looked up and placed
//!
//! - **Application**: Session runtime and port definitions
//!   - `ports`: gateway transport and persistence collaborators
//!   - `session`: `SessionProxy`, the `Workflow` seam, error classification
//!   - `workflows`: contract resolution and order placement
//!
//! - **Infrastructure**: Adapters and ambient concerns
//!   - `gateway`: TCP transport and an in-memory scripted gateway
//!   - `config`: environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: tracing subscriber and optional OTLP export
//!
//! # Data Flow
//!
//! ```text
//!                 ┌────────────── SessionProxy ──────────────┐
//!  targets ──────►│ dispatch ──► tracker ──► transport.send  │──► gateway
//!                 │                                          │
//!  sinks ◄────────│ workflow ◄── listener ◄── GatewayEvent   │◄── gateway
//!                 │              deadline timer              │
//!                 └──────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Request correlation and value types, no I/O.
pub mod domain;

/// Application layer - Session runtime, workflows and ports.
pub mod application;

/// Infrastructure layer - Adapters and ambient concerns.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::accumulator::ResponseAccumulator;
pub use domain::contract::{ContractDescription, ContractSpec, SecurityType};
pub use domain::order::{
    OrderAcknowledgement, OrderAction, OrderRecord, OrderStatusUpdate, OrderTarget, OrderTicket,
    OrderType, TimeInForce,
};
pub use domain::request::{ErrorResponse, PendingOperation, RequestId};
pub use domain::session::{SessionState, StopReason};
pub use domain::tracker::{RequestTracker, TrackerError};

// Ports
pub use application::ports::{
    ContractSink, GatewayEndpoint, GatewayEvent, GatewayRequest, GatewayTransport, OrderSink,
    SinkError, TransportError,
};

// Session runtime
pub use application::session::{
    ErrorClass, SessionConfig, SessionError, SessionFault, SessionOutcome, SessionProxy, Workflow,
    WorkflowError,
};

// Workflows
pub use application::workflows::{
    ContractResolutionWorkflow, OrderBook, OrderPlacementWorkflow, Resolution, ResolutionBook,
};

// Gateway adapters
pub use infrastructure::gateway::{ScriptedGateway, TcpGateway};

// Configuration
pub use infrastructure::config::{ConfigError, ProxySettings};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
