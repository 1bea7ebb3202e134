//! Gateway Message Layouts
//!
//! Field layouts for the message subset the session uses. Outbound requests
//! are turned into field lists for the frame codec; inbound field lists are
//! turned into `GatewayEvent`s.
//!
//! Layouts are fixed: no server-version negotiation is attempted, so optional
//! trailing fields are read when present and defaulted when not.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::application::ports::{GatewayEvent, GatewayRequest};
use crate::domain::contract::{ContractDescription, ContractSpec, SecurityType};
use crate::domain::order::{OrderAcknowledgement, OrderAction, OrderStatusUpdate};
use crate::domain::request::RequestId;

// =============================================================================
// Message Ids
// =============================================================================

/// Client → gateway message ids.
pub mod outgoing {
    /// Place an order.
    pub const PLACE_ORDER: i32 = 3;
    /// Request open orders of this client.
    pub const REQ_OPEN_ORDERS: i32 = 5;
    /// Request contract details.
    pub const REQ_CONTRACT_DATA: i32 = 9;
    /// Start the API session.
    pub const START_API: i32 = 71;
}

/// Gateway → client message ids.
pub mod incoming {
    /// Order status change.
    pub const ORDER_STATUS: i32 = 3;
    /// Error or notice.
    pub const ERR_MSG: i32 = 4;
    /// Open order.
    pub const OPEN_ORDER: i32 = 5;
    /// Next valid id.
    pub const NEXT_VALID_ID: i32 = 9;
    /// Contract details candidate.
    pub const CONTRACT_DATA: i32 = 10;
    /// Managed accounts.
    pub const MANAGED_ACCTS: i32 = 15;
    /// End of contract details.
    pub const CONTRACT_DATA_END: i32 = 52;
    /// End of open orders.
    pub const OPEN_ORDER_END: i32 = 53;
}

/// Client version range announced in the greeting.
pub const VERSION_RANGE: &str = "v100..187";

// =============================================================================
// Errors
// =============================================================================

/// A frame that does not match its layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame had no message id.
    #[error("empty frame")]
    Empty,

    /// A required field was missing.
    #[error("message {msg_id}: missing field {field}")]
    MissingField {
        /// Message id.
        msg_id: i32,
        /// Field name.
        field: &'static str,
    },

    /// A field did not parse.
    #[error("message {msg_id}: invalid {field} '{value}'")]
    InvalidField {
        /// Message id.
        msg_id: i32,
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

// =============================================================================
// Field Reader
// =============================================================================

struct FieldReader<'a> {
    msg_id: i32,
    fields: std::slice::Iter<'a, String>,
}

impl<'a> FieldReader<'a> {
    const fn new(msg_id: i32, fields: std::slice::Iter<'a, String>) -> Self {
        Self { msg_id, fields }
    }

    fn string(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        self.fields
            .next()
            .map(String::as_str)
            .ok_or(DecodeError::MissingField {
                msg_id: self.msg_id,
                field,
            })
    }

    fn string_or_default(&mut self) -> String {
        self.fields.next().cloned().unwrap_or_default()
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.fields.next();
        }
    }

    fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T, DecodeError> {
        let raw = self.string(field)?;
        raw.trim().parse().map_err(|_| DecodeError::InvalidField {
            msg_id: self.msg_id,
            field,
            value: raw.to_string(),
        })
    }

    fn decimal(&mut self, field: &'static str) -> Result<Decimal, DecodeError> {
        let raw = self.string(field)?;
        parse_decimal(raw).ok_or_else(|| DecodeError::InvalidField {
            msg_id: self.msg_id,
            field,
            value: raw.to_string(),
        })
    }

    /// Empty, unparseable and "unset" sentinel values read as `None`.
    fn optional_decimal(&mut self) -> Option<Decimal> {
        self.fields.next().and_then(|raw| parse_decimal(raw))
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .ok()
        .or_else(|| Decimal::from_scientific(raw).ok())
}

// =============================================================================
// Encoding
// =============================================================================

fn opt_decimal(value: Option<Decimal>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

fn push_contract(fields: &mut Vec<String>, contract: &ContractSpec) {
    fields.push(contract.con_id.unwrap_or(0).to_string());
    fields.push(contract.symbol.clone());
    fields.push(contract.sec_type.as_str().to_string());
    fields.push(contract.exchange.clone());
    fields.push(contract.primary_exchange.clone().unwrap_or_default());
    fields.push(contract.currency.clone());
    fields.push(contract.local_symbol.clone().unwrap_or_default());
}

/// START_API: version, client id, optional capabilities.
#[must_use]
pub fn encode_start_api(client_id: i32) -> Vec<String> {
    vec![
        outgoing::START_API.to_string(),
        "2".to_string(),
        client_id.to_string(),
        String::new(),
    ]
}

/// Field list for an outbound request.
#[must_use]
pub fn encode_request(request: &GatewayRequest) -> Vec<String> {
    match request {
        GatewayRequest::ContractDetails { id, contract } => {
            let mut fields = vec![
                outgoing::REQ_CONTRACT_DATA.to_string(),
                "8".to_string(),
                id.to_string(),
            ];
            push_contract(&mut fields, contract);
            // include expired
            fields.push("0".to_string());
            fields
        }
        GatewayRequest::PlaceOrder { id, target } => {
            let order = &target.order;
            let mut fields = vec![outgoing::PLACE_ORDER.to_string(), id.to_string()];
            push_contract(&mut fields, &target.contract);
            fields.extend([
                order.action.as_str().to_string(),
                order.quantity.to_string(),
                order.order_type.as_str().to_string(),
                opt_decimal(order.limit_price),
                opt_decimal(order.aux_price),
                order.time_in_force.as_str().to_string(),
                order.order_ref.clone().unwrap_or_default(),
                order.algo_strategy.clone().unwrap_or_default(),
            ]);
            fields
        }
        GatewayRequest::OpenOrders => vec![outgoing::REQ_OPEN_ORDERS.to_string(), "1".to_string()],
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode an inbound frame. Unknown message ids yield `Ok(None)`.
pub fn decode_event(fields: &[String]) -> Result<Option<GatewayEvent>, DecodeError> {
    let mut iter = fields.iter();
    let raw_id = iter.next().ok_or(DecodeError::Empty)?;
    let msg_id: i32 = raw_id.trim().parse().map_err(|_| DecodeError::InvalidField {
        msg_id: -1,
        field: "message id",
        value: raw_id.clone(),
    })?;
    let mut r = FieldReader::new(msg_id, iter);

    let event = match msg_id {
        incoming::NEXT_VALID_ID => {
            r.skip(1);
            GatewayEvent::NextValidId(RequestId::new(r.parse("order id")?))
        }
        incoming::MANAGED_ACCTS => {
            r.skip(1);
            let accounts = r
                .string("accounts")?
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            GatewayEvent::ManagedAccounts(accounts)
        }
        incoming::ERR_MSG => decode_error(&mut r)?,
        incoming::CONTRACT_DATA => decode_contract_data(&mut r)?,
        incoming::CONTRACT_DATA_END => {
            r.skip(1);
            GatewayEvent::ContractDetailsEnd(RequestId::new(r.parse("request id")?))
        }
        incoming::OPEN_ORDER => decode_open_order(&mut r)?,
        incoming::ORDER_STATUS => decode_order_status(&mut r)?,
        incoming::OPEN_ORDER_END => GatewayEvent::OpenOrderEnd,
        other => {
            tracing::trace!(msg_id = other, fields = fields.len(), "Skipping unhandled message");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn decode_error(r: &mut FieldReader<'_>) -> Result<GatewayEvent, DecodeError> {
    let version: i32 = r.parse("version")?;
    if version < 2 {
        return Ok(GatewayEvent::Error {
            id: None,
            code: 0,
            message: r.string("message")?.to_string(),
            advanced_reject: String::new(),
        });
    }
    let id: i64 = r.parse("id")?;
    let code = r.parse("code")?;
    let message = r.string("message")?.to_string();
    let advanced_reject = r.string_or_default();
    Ok(GatewayEvent::Error {
        id: RequestId::from_wire(id),
        code,
        message,
        advanced_reject,
    })
}

fn decode_contract_data(r: &mut FieldReader<'_>) -> Result<GatewayEvent, DecodeError> {
    let id = RequestId::new(r.parse("request id")?);
    let symbol = r.string("symbol")?.to_string();
    let sec_type: SecurityType = r.parse("security type")?;
    let last_trade_date = r.string_or_default();
    let strike = r.optional_decimal();
    let right = r.string_or_default();
    let exchange = r.string("exchange")?.to_string();
    let currency = r.string("currency")?.to_string();
    let local_symbol = r.string_or_default();
    let market_name = r.string_or_default();
    let trading_class = r.string_or_default();
    let con_id = r.parse("con id")?;
    let min_tick = r.optional_decimal();
    let primary_exchange = r.string_or_default();
    let long_name = r.string_or_default();

    Ok(GatewayEvent::ContractDetails {
        id,
        description: ContractDescription {
            con_id,
            symbol,
            sec_type,
            last_trade_date,
            strike: strike.filter(|s| !s.is_zero()),
            right,
            exchange,
            primary_exchange,
            currency,
            local_symbol,
            market_name,
            trading_class,
            min_tick,
            long_name,
        },
    })
}

fn decode_open_order(r: &mut FieldReader<'_>) -> Result<GatewayEvent, DecodeError> {
    let order_id = RequestId::new(r.parse("order id")?);
    let con_id: i64 = r.parse("con id")?;
    let symbol = r.string("symbol")?.to_string();
    let sec_type: SecurityType = r.parse("security type")?;
    let exchange = r.string("exchange")?.to_string();
    let currency = r.string("currency")?.to_string();
    let local_symbol = r.string_or_default();
    let action = match r.string("action")? {
        "BUY" => OrderAction::Buy,
        "SELL" | "SSHORT" => OrderAction::Sell,
        other => {
            return Err(DecodeError::InvalidField {
                msg_id: incoming::OPEN_ORDER,
                field: "action",
                value: other.to_string(),
            });
        }
    };
    let quantity = r.decimal("quantity")?;
    let order_type = r.string("order type")?.to_string();
    // limit, aux, tif
    r.skip(3);
    let order_ref = Some(r.string_or_default()).filter(|s| !s.is_empty());
    let perm_id = r.parse("perm id")?;
    let status = r.string_or_default();

    Ok(GatewayEvent::OpenOrder(OrderAcknowledgement {
        order_id,
        perm_id,
        contract: ContractSpec {
            symbol,
            sec_type,
            exchange,
            primary_exchange: None,
            currency,
            con_id: (con_id != 0).then_some(con_id),
            local_symbol: Some(local_symbol).filter(|s| !s.is_empty()),
        },
        action,
        quantity,
        order_type,
        status,
        order_ref,
    }))
}

fn decode_order_status(r: &mut FieldReader<'_>) -> Result<GatewayEvent, DecodeError> {
    let order_id = RequestId::new(r.parse("order id")?);
    let status = r.string("status")?.to_string();
    let filled = r.decimal("filled")?;
    let remaining = r.decimal("remaining")?;
    let avg_fill_price = r.decimal("average fill price")?;
    let perm_id = r.parse("perm id")?;
    // parent id, last fill price, client id
    r.skip(3);
    let why_held = r.string_or_default();

    Ok(GatewayEvent::OrderStatus(OrderStatusUpdate {
        order_id,
        status,
        filled,
        remaining,
        avg_fill_price,
        perm_id,
        why_held,
    }))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::order::{OrderTarget, OrderTicket};

    fn fields(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn decodes_handshake_messages() {
        assert_eq!(
            decode_event(&fields(&["9", "1", "100"])).unwrap(),
            Some(GatewayEvent::NextValidId(RequestId::new(100)))
        );
        assert_eq!(
            decode_event(&fields(&["15", "1", "DU123, DU456,"])).unwrap(),
            Some(GatewayEvent::ManagedAccounts(vec![
                "DU123".to_string(),
                "DU456".to_string()
            ]))
        );
    }

    #[test]
    fn decodes_error_with_and_without_request() {
        let event = decode_event(&fields(&["4", "2", "7", "200", "No security definition"]))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            GatewayEvent::Error {
                id: Some(RequestId::new(7)),
                code: 200,
                message: "No security definition".to_string(),
                advanced_reject: String::new(),
            }
        );

        let event = decode_event(&fields(&["4", "2", "-1", "2104", "Market data farm OK", ""]))
            .unwrap()
            .unwrap();
        assert!(matches!(event, GatewayEvent::Error { id: None, code: 2104, .. }));
    }

    #[test]
    fn decodes_legacy_error() {
        let event = decode_event(&fields(&["4", "1", "some error"])).unwrap().unwrap();
        assert!(matches!(event, GatewayEvent::Error { id: None, code: 0, .. }));
    }

    #[test]
    fn decodes_contract_candidate() {
        let frame = fields(&[
            "10", "3", "IBM", "STK", "", "0", "", "SMART", "USD", "IBM", "IBM", "IBM", "8314",
            "0.01", "NYSE", "INTL BUSINESS MACHINES",
        ]);
        let Some(GatewayEvent::ContractDetails { id, description }) = decode_event(&frame).unwrap()
        else {
            panic!("expected contract details");
        };
        assert_eq!(id, RequestId::new(3));
        assert_eq!(description.con_id, 8314);
        assert_eq!(description.strike, None);
        assert_eq!(description.min_tick, Some(dec!(0.01)));
        assert_eq!(description.primary_exchange, "NYSE");
    }

    #[test]
    fn decodes_open_order_and_status() {
        let frame = fields(&[
            "5", "12", "265598", "AAPL", "STK", "SMART", "USD", "AAPL", "BUY", "15", "MKT", "",
            "", "DAY", "b1::AAPL", "1888", "PreSubmitted",
        ]);
        let Some(GatewayEvent::OpenOrder(ack)) = decode_event(&frame).unwrap() else {
            panic!("expected open order");
        };
        assert_eq!(ack.order_id, RequestId::new(12));
        assert_eq!(ack.quantity, dec!(15));
        assert_eq!(ack.order_ref.as_deref(), Some("b1::AAPL"));
        assert_eq!(ack.status, "PreSubmitted");

        let frame = fields(&[
            "3", "12", "Filled", "15", "0", "189.5", "1888", "0", "189.5", "0", "",
        ]);
        let Some(GatewayEvent::OrderStatus(update)) = decode_event(&frame).unwrap() else {
            panic!("expected order status");
        };
        assert_eq!(update.filled, dec!(15));
        assert_eq!(update.avg_fill_price, dec!(189.5));
    }

    #[test]
    fn unknown_message_is_skipped() {
        assert_eq!(decode_event(&fields(&["49", "1", "1708876800"])).unwrap(), None);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert_eq!(decode_event(&[]), Err(DecodeError::Empty));
        assert!(matches!(
            decode_event(&fields(&["9", "1"])),
            Err(DecodeError::MissingField { msg_id: 9, .. })
        ));
        assert!(matches!(
            decode_event(&fields(&["52", "1", "abc"])),
            Err(DecodeError::InvalidField { msg_id: 52, .. })
        ));
    }

    #[test]
    fn encodes_requests() {
        let lookup = GatewayRequest::ContractDetails {
            id: RequestId::new(4),
            contract: ContractSpec::stock("IBM").with_primary_exchange("NYSE"),
        };
        assert_eq!(
            encode_request(&lookup),
            fields(&["9", "8", "4", "0", "IBM", "STK", "SMART", "NYSE", "USD", "", "0"])
        );

        let order = GatewayRequest::PlaceOrder {
            id: RequestId::new(5),
            target: OrderTarget {
                contract: ContractSpec::stock("AAPL"),
                order: OrderTicket::market(OrderAction::Sell, dec!(3)).with_order_ref("r1"),
            },
        };
        let encoded = encode_request(&order);
        assert_eq!(&encoded[..2], &fields(&["3", "5"])[..]);
        assert_eq!(&encoded[9..], &fields(&["SELL", "3", "MKT", "", "", "DAY", "r1", ""])[..]);

        assert_eq!(encode_request(&GatewayRequest::OpenOrders), fields(&["5", "1"]));
        assert_eq!(encode_start_api(3), fields(&["71", "2", "3", ""]));
    }
}
