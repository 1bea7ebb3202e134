//! Order Types
//!
//! Tickets to place, the local record kept for each placement, and the
//! acknowledgement / status callbacks the gateway streams back.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contract::ContractSpec;
use super::request::RequestId;

// =============================================================================
// Ticket Enums
// =============================================================================

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderAction {
    /// Wire code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market.
    #[default]
    Mkt,
    /// Limit.
    Lmt,
    /// Stop.
    Stp,
    /// Stop limit.
    #[serde(rename = "STP LMT")]
    StpLmt,
}

impl OrderType {
    /// Wire code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mkt => "MKT",
            Self::Lmt => "LMT",
            Self::Stp => "STP",
            Self::StpLmt => "STP LMT",
        }
    }

    /// Whether a limit price is required.
    #[must_use]
    pub const fn needs_limit(self) -> bool {
        matches!(self, Self::Lmt | Self::StpLmt)
    }

    /// Whether an aux (stop) price is required.
    #[must_use]
    pub const fn needs_aux(self) -> bool {
        matches!(self, Self::Stp | Self::StpLmt)
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Day.
    #[default]
    Day,
    /// Good till cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// At the opening.
    Opg,
}

impl TimeInForce {
    /// Wire code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Gtc => "GTC",
            Self::Ioc => "IOC",
            Self::Opg => "OPG",
        }
    }
}

// =============================================================================
// Order Ticket
// =============================================================================

/// Everything needed to submit one order for a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    /// Buy or sell.
    pub action: OrderAction,
    /// Quantity in shares / contracts.
    pub quantity: Decimal,
    /// Order type.
    #[serde(default)]
    pub order_type: OrderType,
    /// Limit price for LMT / STP LMT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price for STP / STP LMT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_price: Option<Decimal>,
    /// Time in force.
    #[serde(default)]
    pub time_in_force: TimeInForce,
    /// Algo strategy name (e.g. `Adaptive`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algo_strategy: Option<String>,
    /// Free-form reference echoed back by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_ref: Option<String>,
}

impl OrderTicket {
    /// A DAY market order.
    #[must_use]
    pub const fn market(action: OrderAction, quantity: Decimal) -> Self {
        Self {
            action,
            quantity,
            order_type: OrderType::Mkt,
            limit_price: None,
            aux_price: None,
            time_in_force: TimeInForce::Day,
            algo_strategy: None,
            order_ref: None,
        }
    }

    /// Attach an order reference.
    #[must_use]
    pub fn with_order_ref(mut self, order_ref: impl Into<String>) -> Self {
        self.order_ref = Some(order_ref.into());
        self
    }

    /// Check the ticket is submittable; returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if self.order_type.needs_limit() && self.limit_price.is_none() {
            return Err(format!("{} order requires a limit price", self.order_type.as_str()));
        }
        if self.order_type.needs_aux() && self.aux_price.is_none() {
            return Err(format!("{} order requires an aux price", self.order_type.as_str()));
        }
        Ok(())
    }
}

/// An order to place: the contract plus the ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTarget {
    /// Instrument.
    pub contract: ContractSpec,
    /// Order parameters.
    pub order: OrderTicket,
}

impl fmt::Display for OrderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.order.action.as_str(),
            self.order.quantity,
            self.contract.symbol,
            self.order.order_type.as_str()
        )
    }
}

// =============================================================================
// Local Record
// =============================================================================

/// Local bookkeeping created before an order is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Locally assigned record id.
    pub rid: Uuid,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Gateway order id the order is sent under.
    pub order_id: RequestId,
    /// What was sent.
    pub target: OrderTarget,
}

impl OrderRecord {
    /// Create a record with a fresh id.
    #[must_use]
    pub fn new(order_id: RequestId, target: OrderTarget) -> Self {
        Self {
            rid: Uuid::new_v4(),
            created_at: Utc::now(),
            order_id,
            target,
        }
    }
}

// =============================================================================
// Gateway Callbacks
// =============================================================================

/// An open-order callback: the gateway's view of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAcknowledgement {
    /// Gateway order id.
    pub order_id: RequestId,
    /// Permanent id assigned by the gateway.
    pub perm_id: i64,
    /// Instrument as echoed by the gateway.
    pub contract: ContractSpec,
    /// Side.
    pub action: OrderAction,
    /// Total quantity.
    pub quantity: Decimal,
    /// Order type code as reported.
    pub order_type: String,
    /// Order state (e.g. `PreSubmitted`, `Submitted`).
    pub status: String,
    /// Order reference, if one was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_ref: Option<String>,
}

/// An order-status callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    /// Gateway order id.
    pub order_id: RequestId,
    /// Status text.
    pub status: String,
    /// Filled quantity.
    pub filled: Decimal,
    /// Remaining quantity.
    pub remaining: Decimal,
    /// Average fill price.
    pub avg_fill_price: Decimal,
    /// Permanent id.
    pub perm_id: i64,
    /// Why the order is held, when it is.
    #[serde(default)]
    pub why_held: String,
}
