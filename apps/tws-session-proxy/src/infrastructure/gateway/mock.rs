//! Scripted gateway for testing.
//!
//! An in-memory `GatewayTransport` that replays a greeting on connect and
//! answers each sent request through a responder closure. Useful for
//! integration tests and for dry runs that must not reach a real gateway.

use std::io;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{
    GatewayEndpoint, GatewayEvent, GatewayRequest, GatewayTransport, TransportError,
};
use crate::domain::request::RequestId;

type Responder = dyn Fn(&GatewayRequest) -> Vec<GatewayEvent> + Send + Sync;

#[derive(Default)]
struct ScriptState {
    events: Option<mpsc::Sender<GatewayEvent>>,
    sent: Vec<GatewayRequest>,
    connects: usize,
    disconnects: usize,
}

/// In-memory gateway driven by a script.
///
/// The responder runs while the gateway's internal lock is held and must not
/// call back into the gateway.
pub struct ScriptedGateway {
    greeting: Vec<GatewayEvent>,
    responder: Option<Box<Responder>>,
    refuse: bool,
    state: Mutex<ScriptState>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// Gateway that completes the handshake for account `DU000000` with
    /// request ids starting at 1, and answers nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            greeting: vec![
                GatewayEvent::ManagedAccounts(vec!["DU000000".to_string()]),
                GatewayEvent::NextValidId(RequestId::new(1)),
            ],
            responder: None,
            refuse: false,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Gateway whose `connect` always fails.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    /// Replace the events delivered on connect.
    #[must_use]
    pub fn with_greeting(mut self, greeting: Vec<GatewayEvent>) -> Self {
        self.greeting = greeting;
        self
    }

    /// Answer each sent request with the events `responder` returns.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&GatewayRequest) -> Vec<GatewayEvent> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Deliver an event as if the gateway had sent it.
    pub fn inject(&self, event: GatewayEvent) -> Result<(), TransportError> {
        let state = self.state.lock();
        let events = state.events.as_ref().ok_or(TransportError::NotConnected)?;
        deliver(events, event)
    }

    /// Every request sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<GatewayRequest> {
        self.state.lock().sent.clone()
    }

    /// Number of successful connects.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of disconnects that closed an open connection.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().events.is_some()
    }
}

fn deliver(events: &mpsc::Sender<GatewayEvent>, event: GatewayEvent) -> Result<(), TransportError> {
    events.try_send(event).map_err(|e| match e {
        TrySendError::Full(_) => TransportError::Frame("event queue full".to_string()),
        TrySendError::Closed(_) => TransportError::Closed,
    })
}

#[async_trait]
impl GatewayTransport for ScriptedGateway {
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
        event_capacity: usize,
    ) -> Result<mpsc::Receiver<GatewayEvent>, TransportError> {
        if self.refuse {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("scripted refusal for {}", endpoint.address()),
            )));
        }

        let (tx, rx) = mpsc::channel(event_capacity.max(self.greeting.len()).max(1));
        for event in &self.greeting {
            deliver(&tx, event.clone())?;
        }

        let mut state = self.state.lock();
        state.events = Some(tx);
        state.connects += 1;
        Ok(rx)
    }

    fn send(&self, request: &GatewayRequest) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let events = state.events.clone().ok_or(TransportError::NotConnected)?;
        state.sent.push(request.clone());

        if let Some(responder) = &self.responder {
            for event in responder(request) {
                deliver(&events, event)?;
            }
        }
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        if state.events.take().is_some() {
            state.disconnects += 1;
        }
    }
}
