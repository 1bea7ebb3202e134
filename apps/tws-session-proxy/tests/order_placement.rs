//! Order Placement Integration Tests
//!
//! Order submission over the scripted gateway: records before send,
//! acknowledgement correlation, foreign orders and the open-order refresh.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::timeout;

use tws_session_proxy::application::session::{NOT_SENT_CODE, SINK_FAILED_CODE};
use tws_session_proxy::{
    ContractSpec, GatewayEndpoint, GatewayEvent, GatewayRequest, OrderAcknowledgement,
    OrderAction, OrderPlacementWorkflow, OrderRecord, OrderSink, OrderStatusUpdate, OrderTarget,
    OrderTicket, OrderType, RequestId, ScriptedGateway, SessionConfig, SessionOutcome,
    SessionProxy, SinkError, StopReason,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    submitted: Mutex<Vec<OrderRecord>>,
    acknowledged: Mutex<Vec<(OrderRecord, OrderAcknowledgement)>>,
    statuses: Mutex<Vec<OrderStatusUpdate>>,
    refuse_submit: bool,
    refuse_ack: bool,
}

impl OrderSink for RecordingSink {
    fn on_submitted(&self, record: &OrderRecord) -> Result<(), SinkError> {
        if self.refuse_submit {
            return Err(SinkError::new("orders table is read-only"));
        }
        self.submitted.lock().push(record.clone());
        Ok(())
    }

    fn on_acknowledged(
        &self,
        record: &OrderRecord,
        ack: &OrderAcknowledgement,
    ) -> Result<(), SinkError> {
        if self.refuse_ack {
            return Err(SinkError::new("connection reset"));
        }
        self.acknowledged.lock().push((record.clone(), ack.clone()));
        Ok(())
    }

    fn on_status(&self, update: &OrderStatusUpdate) {
        self.statuses.lock().push(update.clone());
    }
}

fn market(symbol: &str, action: OrderAction, quantity: Decimal) -> OrderTarget {
    OrderTarget {
        contract: ContractSpec::stock(symbol),
        order: OrderTicket::market(action, quantity).with_order_ref(format!("batch-{symbol}")),
    }
}

fn ack(id: RequestId, target: &OrderTarget, status: &str) -> OrderAcknowledgement {
    OrderAcknowledgement {
        order_id: id,
        perm_id: 900_000 + id.value(),
        contract: target.contract.clone(),
        action: target.order.action,
        quantity: target.order.quantity,
        order_type: target.order.order_type.as_str().to_string(),
        status: status.to_string(),
        order_ref: target.order.order_ref.clone(),
    }
}

fn status(id: RequestId, status: &str, remaining: Decimal) -> OrderStatusUpdate {
    OrderStatusUpdate {
        order_id: id,
        status: status.to_string(),
        filled: Decimal::ZERO,
        remaining,
        avg_fill_price: Decimal::ZERO,
        perm_id: 900_000 + id.value(),
        why_held: String::new(),
    }
}

fn foreign_ack() -> OrderAcknowledgement {
    ack(
        RequestId::new(900),
        &market("TSLA", OrderAction::Sell, dec!(3)),
        "Submitted",
    )
}

/// Answer the open-order refresh with its end marker and nothing else.
fn refresh_end(request: &GatewayRequest) -> Vec<GatewayEvent> {
    match request {
        GatewayRequest::OpenOrders => vec![GatewayEvent::OpenOrderEnd],
        _ => Vec::new(),
    }
}

fn config() -> SessionConfig {
    SessionConfig::new(GatewayEndpoint::default())
        .with_pacing_delay(Duration::ZERO)
        .with_timeout(Duration::from_secs(10))
}

async fn place(
    targets: Vec<OrderTarget>,
    gateway: &Arc<ScriptedGateway>,
    sink: &Arc<RecordingSink>,
) -> (SessionProxy<OrderPlacementWorkflow>, SessionOutcome) {
    let workflow = OrderPlacementWorkflow::new(targets, Arc::clone(sink) as _);
    let proxy = SessionProxy::new(workflow, Arc::clone(gateway) as _, config());
    proxy.activate().await.unwrap();
    let outcome = timeout(WAIT, proxy.wait_for_completion())
        .await
        .expect("session did not finish")
        .unwrap();
    (proxy, outcome)
}

// =============================================================================
// Acknowledgement
// =============================================================================

#[tokio::test]
async fn test_two_orders_acknowledged_cleanly() {
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::PlaceOrder { id, target } => {
            vec![GatewayEvent::OpenOrder(ack(*id, target, "PreSubmitted"))]
        }
        GatewayRequest::OpenOrders => vec![GatewayEvent::OpenOrderEnd],
        GatewayRequest::ContractDetails { .. } => Vec::new(),
    }));
    let sink = Arc::new(RecordingSink::default());
    let targets = vec![
        market("AAPL", OrderAction::Buy, dec!(15)),
        market("MSFT", OrderAction::Sell, dec!(7)),
    ];

    let (proxy, outcome) = place(targets, &gateway, &sink).await;

    assert!(outcome.is_clean());
    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);

    let submitted = sink.submitted.lock();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].order_id, RequestId::new(1));
    assert_eq!(submitted[1].order_id, RequestId::new(2));
    assert_ne!(submitted[0].rid, submitted[1].rid);

    let acknowledged = sink.acknowledged.lock();
    assert_eq!(acknowledged.len(), 2);
    assert_eq!(acknowledged[0].0.rid, submitted[0].rid);
    assert_eq!(acknowledged[1].1.order_ref.as_deref(), Some("batch-MSFT"));

    proxy.with_book(|book| {
        assert!(book.queued().is_empty());
        assert_eq!(book.acknowledged().count(), 2);
    });

    let sent = gateway.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2], GatewayRequest::OpenOrders);
}

#[tokio::test]
async fn test_status_updates_reach_the_sink() {
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::PlaceOrder { id, target } => vec![
            GatewayEvent::OrderStatus(status(*id, "PreSubmitted", target.order.quantity)),
            GatewayEvent::OpenOrder(ack(*id, target, "PreSubmitted")),
        ],
        other => refresh_end(other),
    }));
    let sink = Arc::new(RecordingSink::default());

    let (proxy, outcome) = place(
        vec![market("AAPL", OrderAction::Buy, dec!(15))],
        &gateway,
        &sink,
    )
    .await;

    assert!(outcome.is_clean());
    let statuses = sink.statuses.lock();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].remaining, dec!(15));
    proxy.with_book(|book| {
        assert_eq!(
            book.status(RequestId::new(1)).map(|s| s.status.as_str()),
            Some("PreSubmitted")
        );
    });
}

#[tokio::test]
async fn test_foreign_acknowledgement_is_kept_aside() {
    // The gateway stays silent on placement; the refresh reports a foreign
    // order first, then ours.
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::OpenOrders => vec![
            GatewayEvent::OpenOrder(foreign_ack()),
            GatewayEvent::OpenOrder(ack(
                RequestId::new(1),
                &market("AAPL", OrderAction::Buy, dec!(15)),
                "Submitted",
            )),
            GatewayEvent::OpenOrderEnd,
        ],
        _ => Vec::new(),
    }));
    let sink = Arc::new(RecordingSink::default());

    let (proxy, outcome) = place(
        vec![market("AAPL", OrderAction::Buy, dec!(15))],
        &gateway,
        &sink,
    )
    .await;

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert!(outcome.is_clean());
    assert_eq!(sink.acknowledged.lock().len(), 1);
    proxy.with_book(|book| {
        assert_eq!(book.external().len(), 1);
        assert_eq!(book.external()[0].order_id, RequestId::new(900));
    });
}

#[tokio::test]
async fn test_refresh_is_consumed_after_every_order_is_acknowledged() {
    // Both orders are acknowledged during dispatch, so the tracker is idle
    // before the refresh goes out; the refresh must still be read to its end.
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::PlaceOrder { id, target } => {
            vec![GatewayEvent::OpenOrder(ack(*id, target, "Submitted"))]
        }
        GatewayRequest::OpenOrders => vec![
            GatewayEvent::OpenOrder(foreign_ack()),
            GatewayEvent::OpenOrderEnd,
        ],
        GatewayRequest::ContractDetails { .. } => Vec::new(),
    }));
    let sink = Arc::new(RecordingSink::default());
    let workflow = OrderPlacementWorkflow::new(
        vec![
            market("AAPL", OrderAction::Buy, dec!(15)),
            market("MSFT", OrderAction::Sell, dec!(7)),
        ],
        Arc::clone(&sink) as _,
    );
    let proxy = SessionProxy::new(
        workflow,
        Arc::clone(&gateway) as _,
        config().with_pacing_delay(Duration::from_millis(20)),
    );
    proxy.activate().await.unwrap();
    let outcome = timeout(WAIT, proxy.wait_for_completion())
        .await
        .expect("session did not finish")
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert!(outcome.is_clean());
    assert_eq!(sink.acknowledged.lock().len(), 2);
    assert_eq!(gateway.sent().last(), Some(&GatewayRequest::OpenOrders));
    proxy.with_book(|book| {
        assert_eq!(book.external().len(), 1);
        assert_eq!(book.external()[0].order_id, RequestId::new(900));
    });
}

#[tokio::test]
async fn test_open_orders_end_stops_session_after_dispatch() {
    // No acknowledgement ever arrives; the refresh end still stops the session.
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::OpenOrders => vec![GatewayEvent::OpenOrderEnd],
        _ => Vec::new(),
    }));
    let sink = Arc::new(RecordingSink::default());

    let (_proxy, outcome) = place(
        vec![market("AAPL", OrderAction::Buy, dec!(15))],
        &gateway,
        &sink,
    )
    .await;

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert_eq!(outcome.outstanding, vec![RequestId::new(1)]);
    assert!(!outcome.is_clean());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_gateway_rejection_is_filed_against_order() {
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::PlaceOrder { id, .. } => vec![GatewayEvent::Error {
            id: Some(*id),
            code: 201,
            message: "Order rejected - reason: insufficient buying power".to_string(),
            advanced_reject: String::new(),
        }],
        other => refresh_end(other),
    }));
    let sink = Arc::new(RecordingSink::default());

    let (proxy, outcome) = place(
        vec![market("AAPL", OrderAction::Buy, dec!(15000))],
        &gateway,
        &sink,
    )
    .await;

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].code, 201);
    assert!(sink.acknowledged.lock().is_empty());
    proxy.with_book(|book| assert_eq!(book.queued().len(), 1));
}

#[tokio::test]
async fn test_acknowledgement_sink_failure_is_reported() {
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::PlaceOrder { id, target } => {
            vec![GatewayEvent::OpenOrder(ack(*id, target, "Submitted"))]
        }
        other => refresh_end(other),
    }));
    let sink = Arc::new(RecordingSink {
        refuse_ack: true,
        ..RecordingSink::default()
    });

    let (proxy, outcome) = place(
        vec![market("AAPL", OrderAction::Buy, dec!(15))],
        &gateway,
        &sink,
    )
    .await;

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].code, SINK_FAILED_CODE);
    proxy.with_book(|book| assert_eq!(book.acknowledged().count(), 1));
}

#[tokio::test]
async fn test_unrecorded_order_is_never_sent() {
    let gateway = Arc::new(ScriptedGateway::new().with_responder(refresh_end));
    let sink = Arc::new(RecordingSink {
        refuse_submit: true,
        ..RecordingSink::default()
    });

    let (_proxy, outcome) = place(
        vec![market("AAPL", OrderAction::Buy, dec!(15))],
        &gateway,
        &sink,
    )
    .await;

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].code, NOT_SENT_CODE);
    assert_eq!(gateway.sent(), vec![GatewayRequest::OpenOrders]);
}

#[tokio::test]
async fn test_invalid_ticket_is_never_sent() {
    let gateway = Arc::new(ScriptedGateway::new().with_responder(|request| match request {
        GatewayRequest::PlaceOrder { id, target } => {
            vec![GatewayEvent::OpenOrder(ack(*id, target, "Submitted"))]
        }
        other => refresh_end(other),
    }));
    let sink = Arc::new(RecordingSink::default());

    let mut limit = market("MSFT", OrderAction::Buy, dec!(5));
    limit.order.order_type = OrderType::Lmt;

    let (_proxy, outcome) = place(
        vec![limit, market("AAPL", OrderAction::Buy, dec!(15))],
        &gateway,
        &sink,
    )
    .await;

    assert_eq!(outcome.stop_reason, StopReason::OpenOrdersEnd);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].request_id, Some(RequestId::new(1)));
    assert_eq!(outcome.errors[0].code, NOT_SENT_CODE);
    assert!(outcome.errors[0].message.contains("limit price"));
    assert_eq!(sink.submitted.lock().len(), 1);
}
