//! Port Interfaces
//!
//! Contracts between the session runtime and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `GatewayTransport`: connection to a TWS / IB Gateway
//! - `ContractSink`: receives resolved contracts
//! - `OrderSink`: receives order records, acknowledgements and status
//!
//! Inbound gateway callbacks are delivered as `GatewayEvent`s over one
//! channel returned by `GatewayTransport::connect`.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::contract::{ContractDescription, ContractSpec};
use crate::domain::order::{OrderAcknowledgement, OrderRecord, OrderStatusUpdate, OrderTarget};
use crate::domain::request::RequestId;

// =============================================================================
// Gateway Endpoint
// =============================================================================

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// API client id for this session.
    pub client_id: i32,
}

impl GatewayEndpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, client_id: i32) -> Self {
        Self {
            host: host.into(),
            port,
            client_id,
        }
    }

    /// `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayEndpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 7497, 0)
    }
}

// =============================================================================
// Requests and Events
// =============================================================================

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum GatewayRequest {
    /// Look up contracts matching a spec.
    ContractDetails {
        /// Correlation id.
        id: RequestId,
        /// What to look up.
        contract: ContractSpec,
    },
    /// Submit an order under a gateway order id.
    PlaceOrder {
        /// Order id.
        id: RequestId,
        /// What to place.
        target: OrderTarget,
    },
    /// Ask for every open order of this client.
    OpenOrders,
}

impl GatewayRequest {
    /// Operation name filed with the tracker.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ContractDetails { .. } => "contract_details",
            Self::PlaceOrder { .. } => "place_order",
            Self::OpenOrders => "open_orders",
        }
    }

    /// Correlation id, for requests that carry one.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::ContractDetails { id, .. } | Self::PlaceOrder { id, .. } => Some(*id),
            Self::OpenOrders => None,
        }
    }
}

/// An inbound gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Handshake: accounts managed by this login.
    ManagedAccounts(Vec<String>),
    /// Handshake: first usable request / order id.
    NextValidId(RequestId),
    /// Error or notice. `id` is `None` for notices not tied to a request.
    Error {
        /// Request the error refers to.
        id: Option<RequestId>,
        /// Gateway error code.
        code: i32,
        /// Message text.
        message: String,
        /// Advanced order-reject JSON, possibly empty.
        advanced_reject: String,
    },
    /// One contract lookup candidate.
    ContractDetails {
        /// Lookup id.
        id: RequestId,
        /// Candidate.
        description: ContractDescription,
    },
    /// End of a contract lookup.
    ContractDetailsEnd(RequestId),
    /// Open-order acknowledgement.
    OpenOrder(OrderAcknowledgement),
    /// Order status change.
    OrderStatus(OrderStatusUpdate),
    /// End of an open-order refresh.
    OpenOrderEnd,
    /// The transport closed.
    ConnectionClosed,
}

// =============================================================================
// Transport Port
// =============================================================================

/// Errors from the gateway transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The greeting did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// `send` before `connect`, or after `disconnect`.
    #[error("not connected")]
    NotConnected,

    /// A frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(String),

    /// The connection closed.
    #[error("connection closed")]
    Closed,
}

/// Connection to a gateway.
///
/// `send` must not block: implementations enqueue the request and return, so
/// the session may call it while holding its lock.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Open the connection, perform the greeting and return the inbound
    /// event stream.
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
        event_capacity: usize,
    ) -> Result<mpsc::Receiver<GatewayEvent>, TransportError>;

    /// Enqueue an outbound request.
    fn send(&self, request: &GatewayRequest) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn disconnect(&self);
}

// =============================================================================
// Sink Ports
// =============================================================================

/// Error returned by a persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sink failed: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    /// Create a sink error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives contracts that resolved to exactly one candidate.
pub trait ContractSink: Send + Sync {
    /// Persist a resolved contract.
    fn on_resolved(
        &self,
        target: &ContractSpec,
        description: &ContractDescription,
    ) -> Result<(), SinkError>;
}

impl<F> ContractSink for F
where
    F: Fn(&ContractSpec, &ContractDescription) -> Result<(), SinkError> + Send + Sync,
{
    fn on_resolved(
        &self,
        target: &ContractSpec,
        description: &ContractDescription,
    ) -> Result<(), SinkError> {
        self(target, description)
    }
}

/// Receives order lifecycle events.
pub trait OrderSink: Send + Sync {
    /// Persist the local record before the order is sent. Failing skips it.
    fn on_submitted(&self, record: &OrderRecord) -> Result<(), SinkError>;

    /// Persist the gateway's acknowledgement of a locally placed order.
    fn on_acknowledged(
        &self,
        record: &OrderRecord,
        ack: &OrderAcknowledgement,
    ) -> Result<(), SinkError>;

    /// Observe a status change.
    fn on_status(&self, _update: &OrderStatusUpdate) {}
}
