//! Order Placement Workflow
//!
//! Places one order per target. Each order gets a local record, handed to
//! the sink, before it is sent; the gateway's open-order acknowledgement is
//! correlated back to that record and retires the request. Once every order
//! is dispatched an open-order refresh is requested, and its end marker
//! stops the session.
//!
//! Acknowledgements for orders this session did not place are expected (the
//! same account may be traded from other clients) and are only logged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::application::ports::{GatewayEvent, GatewayRequest, OrderSink};
use crate::application::session::{
    SINK_FAILED_CODE, Session, SessionFault, Workflow, WorkflowError,
};
use crate::domain::order::{OrderAcknowledgement, OrderRecord, OrderStatusUpdate, OrderTarget};
use crate::domain::request::RequestId;
use crate::domain::session::StopReason;

/// Orders placed in this session and what the gateway said about them.
#[derive(Debug, Default)]
pub struct OrderBook {
    queued: HashMap<RequestId, OrderRecord>,
    acknowledged: BTreeMap<RequestId, OrderRecord>,
    statuses: HashMap<RequestId, OrderStatusUpdate>,
    external: Vec<OrderAcknowledgement>,
}

impl OrderBook {
    /// Orders sent and not yet acknowledged.
    #[must_use]
    pub fn queued(&self) -> Vec<&OrderRecord> {
        let mut queued: Vec<_> = self.queued.values().collect();
        queued.sort_by_key(|record| record.order_id);
        queued
    }

    /// Acknowledged orders in order-id order.
    pub fn acknowledged(&self) -> impl Iterator<Item = &OrderRecord> {
        self.acknowledged.values()
    }

    /// Latest status seen for `order_id`.
    #[must_use]
    pub fn status(&self, order_id: RequestId) -> Option<&OrderStatusUpdate> {
        self.statuses.get(&order_id)
    }

    /// Acknowledgements for orders placed outside this session.
    #[must_use]
    pub fn external(&self) -> &[OrderAcknowledgement] {
        &self.external
    }
}

/// Places orders and correlates their acknowledgements.
pub struct OrderPlacementWorkflow {
    targets: Vec<OrderTarget>,
    sink: Arc<dyn OrderSink>,
}

impl OrderPlacementWorkflow {
    /// Create a workflow over `targets`, persisting through `sink`.
    pub fn new(targets: Vec<OrderTarget>, sink: Arc<dyn OrderSink>) -> Self {
        Self { targets, sink }
    }

    fn on_open_order(
        &self,
        ack: OrderAcknowledgement,
        session: &Session<Self>,
    ) -> Result<(), SessionFault> {
        let id = ack.order_id;
        let record = session.with_book(|book| book.queued.remove(&id));

        let Some(record) = record else {
            let echoed = session.with_book(|book| book.acknowledged.contains_key(&id));
            if echoed {
                tracing::debug!(order_id = %id, status = %ack.status, "Open order refresh");
            } else {
                tracing::warn!(
                    order_id = %id,
                    perm_id = ack.perm_id,
                    symbol = %ack.contract.symbol,
                    status = %ack.status,
                    "Acknowledgement for order placed outside this session"
                );
                session.with_book(|book| book.external.push(ack));
            }
            return Ok(());
        };

        if !session.is_pending(id) {
            tracing::debug!(order_id = %id, status = %ack.status, "Acknowledgement for failed order");
            session.with_book(|book| book.acknowledged.insert(id, record));
            return Ok(());
        }

        session.partial_response(id, ack.clone())?;
        let persisted = self.sink.on_acknowledged(&record, &ack);
        tracing::info!(
            order_id = %id,
            rid = %record.rid,
            order = %record.target,
            status = %ack.status,
            "Order acknowledged"
        );
        session.with_book(|book| book.acknowledged.insert(id, record));

        match persisted {
            Ok(()) => session.complete_response(id).map(drop),
            Err(e) => {
                tracing::error!(order_id = %id, error = %e, "Failed to persist acknowledgement");
                session.reject_request(id, SINK_FAILED_CODE, e.to_string())
            }
        }
    }

    fn on_status(&self, update: OrderStatusUpdate, session: &Session<Self>) {
        tracing::debug!(
            order_id = %update.order_id,
            status = %update.status,
            filled = %update.filled,
            remaining = %update.remaining,
            "Order status"
        );
        self.sink.on_status(&update);
        session.with_book(|book| book.statuses.insert(update.order_id, update));
    }
}

impl Workflow for OrderPlacementWorkflow {
    type Target = OrderTarget;
    type Fragment = OrderAcknowledgement;
    type Book = OrderBook;

    fn name(&self) -> &'static str {
        "order_placement"
    }

    fn targets(&self) -> &[OrderTarget] {
        &self.targets
    }

    fn prepare(
        &self,
        id: RequestId,
        target: &OrderTarget,
        book: &mut OrderBook,
    ) -> Result<GatewayRequest, WorkflowError> {
        target.order.validate().map_err(WorkflowError::InvalidTarget)?;

        let record = OrderRecord::new(id, target.clone());
        self.sink.on_submitted(&record)?;
        tracing::info!(
            order_id = %id,
            rid = %record.rid,
            order = %target,
            algo = target.order.algo_strategy.as_deref().unwrap_or("none"),
            "Placing order"
        );
        book.queued.insert(id, record);

        Ok(GatewayRequest::PlaceOrder {
            id,
            target: target.clone(),
        })
    }

    fn after_dispatch(&self) -> Option<GatewayRequest> {
        Some(GatewayRequest::OpenOrders)
    }

    fn on_event(&self, event: GatewayEvent, session: &Session<Self>) -> Result<(), SessionFault> {
        match event {
            GatewayEvent::OpenOrder(ack) => self.on_open_order(ack, session),
            GatewayEvent::OrderStatus(update) => {
                self.on_status(update, session);
                Ok(())
            }
            GatewayEvent::OpenOrderEnd => {
                if session.requests_complete() {
                    tracing::info!("Open order refresh complete");
                    session.stop(StopReason::OpenOrdersEnd);
                } else {
                    tracing::debug!("Open order end before dispatch finished, ignoring");
                }
                Ok(())
            }
            other => {
                tracing::trace!(event = ?other, "Ignoring event");
                Ok(())
            }
        }
    }
}
