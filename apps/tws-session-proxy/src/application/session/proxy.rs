//! Session Proxy
//!
//! Runs one gateway session from `activate` to `stop`.
//!
//! # Tasks
//!
//! - **listener**: consumes inbound events; the only task that files
//!   responses and errors
//! - **dispatch**: started once the handshake completes; the only source of
//!   outbound requests
//! - **deadline**: stops the session when the timeout elapses
//!
//! # Locking
//!
//! Tracker, accumulator, workflow book and lifecycle state share one
//! `parking_lot::Mutex` that is never held across an `.await`. `stop` takes
//! the lock only to flip the state, then cancels and disconnects outside it,
//! so it is safe to call from any task, any number of times.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──activate──► Handshaking ──accounts + next id──► Active
//!                                                             │
//!                                               dispatch done ▼
//!                         Stopped ◄──idle / error / deadline── Draining
//! ```
//!
//! A workflow with a trailing request (see `Workflow::after_dispatch`) is not
//! stopped on idle once that request is out; it stops itself when the
//! trailing response ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::{ErrorClass, SessionError, SessionFault};
use super::workflow::{NOT_SENT_CODE, Workflow};
use crate::application::ports::{
    GatewayEndpoint, GatewayEvent, GatewayRequest, GatewayTransport, TransportError,
};
use crate::domain::accumulator::ResponseAccumulator;
use crate::domain::request::{ErrorResponse, RequestId};
use crate::domain::session::{SessionState, StopReason};
use crate::domain::tracker::{ErrorDisposition, RequestTracker, TrackerError};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Default session deadline (15 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default delay between outbound requests.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(500);

/// Default inbound event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Gateway to connect to.
    pub endpoint: GatewayEndpoint,
    /// Deadline after which the session is stopped.
    pub timeout: Duration,
    /// Delay between successive requests; zero disables pacing.
    pub pacing_delay: Duration,
    /// Inbound event channel capacity.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: GatewayEndpoint::default(),
            timeout: DEFAULT_TIMEOUT,
            pacing_delay: DEFAULT_PACING_DELAY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Settings for `endpoint` with default timing.
    #[must_use]
    pub fn new(endpoint: GatewayEndpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the pacing delay.
    #[must_use]
    pub const fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// What a finished session reports to its driver.
///
/// Gateway rejections are data here, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    /// Why the session stopped.
    pub stop_reason: StopReason,
    /// Informational notices.
    pub info: Vec<ErrorResponse>,
    /// Failed operations, in request-id order.
    pub errors: Vec<ErrorResponse>,
    /// Requests still pending when the session stopped.
    pub outstanding: Vec<RequestId>,
}

impl SessionOutcome {
    /// No errors and nothing left outstanding.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.outstanding.is_empty()
    }
}

// =============================================================================
// Session
// =============================================================================

struct SessionCore<B, F> {
    state: SessionState,
    accounts: Option<Vec<String>>,
    tracker: RequestTracker,
    responses: ResponseAccumulator<F>,
    book: B,
    stop_reason: Option<StopReason>,
    fault: Option<SessionFault>,
    started_at: Option<Instant>,
    /// A trailing request is out; only the workflow's own end marker, an
    /// error or the deadline end the session from here.
    awaiting_trailing: bool,
}

impl<B, F> SessionCore<B, F> {
    fn is_idle(&self) -> bool {
        self.tracker.is_idle() && !self.awaiting_trailing
    }
}

/// Shared state of one session, handed to workflows while they handle
/// events.
pub struct Session<W: Workflow> {
    workflow: W,
    transport: Arc<dyn GatewayTransport>,
    config: SessionConfig,
    core: Mutex<SessionCore<W::Book, W::Fragment>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

enum DispatchError {
    Fault(SessionFault),
    Send(TransportError),
}

impl From<TrackerError> for DispatchError {
    fn from(err: TrackerError) -> Self {
        Self::Fault(err.into())
    }
}

impl<W: Workflow> Session<W> {
    fn new(workflow: W, transport: Arc<dyn GatewayTransport>, config: SessionConfig) -> Self {
        Self {
            workflow,
            transport,
            config,
            core: Mutex::new(SessionCore {
                state: SessionState::Created,
                accounts: None,
                tracker: RequestTracker::new(),
                responses: ResponseAccumulator::new(),
                book: W::Book::default(),
                stop_reason: None,
                fault: None,
                started_at: None,
                awaiting_trailing: false,
            }),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The workflow this session runs.
    pub const fn workflow(&self) -> &W {
        &self.workflow
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Accounts reported during the handshake.
    pub fn accounts(&self) -> Vec<String> {
        self.core.lock().accounts.clone().unwrap_or_default()
    }

    /// Whether `id` is awaiting a terminal response.
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.core.lock().tracker.is_pending(id)
    }

    /// Whether `id` was filed in this session.
    pub fn is_known(&self, id: RequestId) -> bool {
        self.core.lock().tracker.is_known(id)
    }

    /// Whether every target has been dispatched.
    pub fn requests_complete(&self) -> bool {
        self.core.lock().tracker.requests_complete()
    }

    /// Run `f` over the workflow's correlation state under the session lock.
    ///
    /// `f` must not call back into the session: the lock is not reentrant
    /// and doing so deadlocks.
    pub fn with_book<R>(&self, f: impl FnOnce(&mut W::Book) -> R) -> R {
        f(&mut self.core.lock().book)
    }

    /// Buffer a partial response for `id`.
    ///
    /// Fragments for a request that already failed are dropped; fragments for
    /// a request never filed are a protocol violation.
    pub fn partial_response(&self, id: RequestId, fragment: W::Fragment) -> Result<(), SessionFault> {
        let mut core = self.core.lock();
        if core.tracker.is_pending(id) {
            core.tracker.record_fragment(id)?;
            core.responses.append_partial(id, fragment);
            Ok(())
        } else if core.tracker.is_known(id) {
            tracing::debug!(request_id = %id, "Dropping fragment for retired request");
            Ok(())
        } else {
            Err(SessionFault::Protocol(format!(
                "partial response for unknown request {id}"
            )))
        }
    }

    /// Remove and return the fragments buffered for `id`.
    pub fn take_responses(&self, id: RequestId) -> Vec<W::Fragment> {
        self.core.lock().responses.retrieve_and_clear(id)
    }

    /// Retire `id` as successful and return whatever was still buffered for
    /// it. Stops the session if it is now idle.
    pub fn complete_response(&self, id: RequestId) -> Result<Vec<W::Fragment>, SessionFault> {
        let (fragments, idle) = {
            let mut core = self.core.lock();
            core.tracker.record_success(id)?;
            let fragments = core.responses.retrieve_and_clear(id);
            metrics::set_pending_operations(self.workflow.name(), core.tracker.pending_count());
            (fragments, core.is_idle())
        };

        metrics::record_response_completed(self.workflow.name());
        if idle {
            self.stop(StopReason::Idle);
        }
        Ok(fragments)
    }

    /// Retire `id` with a locally determined error. Stops the session if it
    /// is now idle.
    pub fn reject_request(
        &self,
        id: RequestId,
        code: i32,
        message: impl Into<String>,
    ) -> Result<(), SessionFault> {
        let idle = {
            let mut core = self.core.lock();
            core.tracker
                .record_error(ErrorResponse::new(Some(id), code, message))?;
            core.responses.retrieve_and_clear(id);
            metrics::set_pending_operations(self.workflow.name(), core.tracker.pending_count());
            core.is_idle()
        };

        if idle {
            self.stop(StopReason::Idle);
        }
        Ok(())
    }

    /// Stop the session. Only the first call has any effect.
    pub fn stop(&self, reason: StopReason) {
        let elapsed = {
            let mut core = self.core.lock();
            if core.state.is_stopped() {
                tracing::debug!(%reason, "Session already stopped");
                return;
            }
            core.state = SessionState::Stopped;
            core.stop_reason = Some(reason);
            core.responses.clear();
            core.tracker.dump("stop");
            metrics::set_pending_operations(self.workflow.name(), core.tracker.pending_count());
            core.started_at.map(|t| t.elapsed()).unwrap_or_default()
        };

        tracing::info!(
            workflow = self.workflow.name(),
            %reason,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Session stopped"
        );
        metrics::record_session_stopped(self.workflow.name(), reason, elapsed);
        self.cancel.cancel();
        self.transport.disconnect();
    }

    fn fault(&self, fault: SessionFault) {
        tracing::error!(workflow = self.workflow.name(), %fault, "Session fault");
        {
            let mut core = self.core.lock();
            if core.fault.is_none() {
                core.fault = Some(fault);
            }
        }
        self.stop(StopReason::ProtocolViolation);
    }

    fn outcome(&self) -> Result<SessionOutcome, SessionError> {
        let core = self.core.lock();
        if let Some(fault) = &core.fault {
            return Err(SessionError::Fault(fault.clone()));
        }
        Ok(SessionOutcome {
            stop_reason: core.stop_reason.unwrap_or(StopReason::Requested),
            info: core.tracker.info().to_vec(),
            errors: core.tracker.errors(),
            outstanding: core.tracker.pending_ids(),
        })
    }

    // =========================================================================
    // Listener
    // =========================================================================

    async fn listen(self: Arc<Self>, mut events: mpsc::Receiver<GatewayEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(event) => self.handle_event(event),
                None => {
                    self.stop(StopReason::ConnectionClosed);
                    break;
                }
            }
        }
        tracing::debug!(workflow = self.workflow.name(), "Listener finished");
    }

    fn handle_event(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::ManagedAccounts(accounts) => {
                tracing::info!(accounts = ?accounts, "Managed accounts received");
                self.core.lock().accounts = Some(accounts);
                self.start_if_possible();
            }
            GatewayEvent::NextValidId(id) => {
                let result = self.core.lock().tracker.initialize(id);
                match result {
                    Ok(()) => tracing::info!(next_id = %id, "Initial request id received"),
                    Err(e) => tracing::debug!(next_id = %id, error = %e, "Repeated next valid id ignored"),
                }
                self.start_if_possible();
            }
            GatewayEvent::Error {
                id,
                code,
                message,
                advanced_reject,
            } => {
                let error = ErrorResponse::new(id, code, message).with_advanced_reject(advanced_reject);
                self.handle_error(error);
            }
            GatewayEvent::ConnectionClosed => self.stop(StopReason::ConnectionClosed),
            other => {
                if let Err(fault) = self.workflow.on_event(other, self) {
                    self.fault(fault);
                }
            }
        }
    }

    fn handle_error(&self, error: ErrorResponse) {
        let class = ErrorClass::of(error.code);
        metrics::record_gateway_error(class);

        if class == ErrorClass::Ignored {
            tracing::debug!(code = error.code, message = %error.message, "Ignoring gateway notice");
            return;
        }

        let code = error.code;
        let request_id = error.request_id;
        let (filed, idle) = {
            let mut core = self.core.lock();
            let filed = core.tracker.record_error(error);
            if let (Ok(ErrorDisposition::Failed | ErrorDisposition::LateFailure), Some(id)) =
                (&filed, request_id)
            {
                core.responses.retrieve_and_clear(id);
            }
            metrics::set_pending_operations(self.workflow.name(), core.tracker.pending_count());
            (filed, core.is_idle())
        };

        match class {
            ErrorClass::TransportSevered | ErrorClass::SessionDead => {
                if let Err(e) = filed {
                    tracing::warn!(code, error = %e, "Fatal gateway error for unfiled request");
                }
                let reason = if class == ErrorClass::TransportSevered {
                    StopReason::TransportSevered { code }
                } else {
                    StopReason::RemoteSessionEnded { code }
                };
                self.stop(reason);
            }
            _ => match filed {
                Ok(_) if idle => self.stop(StopReason::Idle),
                Ok(_) => {}
                Err(e) => self.fault(e.into()),
            },
        }
    }

    fn start_if_possible(self: &Arc<Self>) {
        let ready = {
            let mut core = self.core.lock();
            let ready = core.state == SessionState::Handshaking
                && core.accounts.is_some()
                && core.tracker.is_initialized();
            if ready {
                core.state = SessionState::Active;
            }
            ready
        };

        if ready {
            tracing::info!(workflow = self.workflow.name(), "Handshake complete, starting dispatch");
            let handle = tokio::spawn(Arc::clone(self).dispatch());
            self.tasks.lock().push(handle);
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    async fn dispatch(self: Arc<Self>) {
        let targets = self.workflow.targets();
        if targets.is_empty() {
            tracing::warn!(workflow = self.workflow.name(), "No targets to dispatch");
            self.stop(StopReason::NoTargets);
            return;
        }

        for (index, target) in targets.iter().enumerate() {
            if index > 0 && !self.config.pacing_delay.is_zero() {
                tokio::select! {
                    () = self.cancel.cancelled() => return,
                    () = tokio::time::sleep(self.config.pacing_delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }

            match self.dispatch_one(target) {
                Ok(()) => {}
                Err(DispatchError::Fault(fault)) => {
                    self.fault(fault);
                    return;
                }
                Err(DispatchError::Send(e)) => {
                    tracing::error!(error = %e, "Failed to send request");
                    self.stop(StopReason::DispatchFailed);
                    return;
                }
            }
        }

        self.finish_dispatch();
    }

    fn dispatch_one(&self, target: &W::Target) -> Result<(), DispatchError> {
        let mut guard = self.core.lock();
        if !guard.state.can_send() {
            return Ok(());
        }
        let core = &mut *guard;

        let id = core.tracker.next_id()?;
        match self.workflow.prepare(id, target, &mut core.book) {
            Ok(request) => {
                core.tracker
                    .record_request(request.operation(), payload_of(&request))?;
                self.transport.send(&request).map_err(DispatchError::Send)?;
                tracing::debug!(request_id = %id, operation = request.operation(), "Request sent");
                metrics::record_request_sent(self.workflow.name(), request.operation());
                metrics::set_pending_operations(self.workflow.name(), core.tracker.pending_count());
            }
            Err(e) => {
                tracing::warn!(request_id = %id, item = ?target, error = %e, "Target not sent");
                core.tracker.record_request("not_sent", payload_of(target))?;
                core.tracker
                    .record_error(ErrorResponse::new(Some(id), NOT_SENT_CODE, e.to_string()))?;
            }
        }
        Ok(())
    }

    fn finish_dispatch(&self) {
        let idle = {
            let mut core = self.core.lock();
            if core.state.is_stopped() {
                return;
            }
            if let Some(request) = self.workflow.after_dispatch() {
                if let Err(e) = self.transport.send(&request) {
                    drop(core);
                    tracing::error!(error = %e, "Failed to send trailing request");
                    self.stop(StopReason::DispatchFailed);
                    return;
                }
                metrics::record_request_sent(self.workflow.name(), request.operation());
                core.awaiting_trailing = true;
            }
            core.tracker.mark_requests_complete();
            core.state = SessionState::Draining;
            core.tracker.dump("dispatch complete");
            core.is_idle()
        };

        tracing::info!(workflow = self.workflow.name(), "Dispatch complete");
        if idle {
            self.stop(StopReason::Idle);
        }
    }

    // =========================================================================
    // Deadline
    // =========================================================================

    async fn deadline(self: Arc<Self>) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(self.config.timeout) => {
                tracing::warn!(
                    workflow = self.workflow.name(),
                    timeout_secs = self.config.timeout.as_secs(),
                    "Session deadline exceeded"
                );
                self.stop(StopReason::DeadlineExceeded);
            }
        }
    }
}

fn payload_of<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

// =============================================================================
// Session Proxy
// =============================================================================

/// Driver-facing handle to a session: `activate`, then
/// `wait_for_completion`.
pub struct SessionProxy<W: Workflow> {
    session: Arc<Session<W>>,
}

impl<W: Workflow> SessionProxy<W> {
    /// Create a session for `workflow` over `transport`.
    pub fn new(workflow: W, transport: Arc<dyn GatewayTransport>, config: SessionConfig) -> Self {
        Self {
            session: Arc::new(Session::new(workflow, transport, config)),
        }
    }

    /// Connect, start the listener and the deadline timer.
    ///
    /// Dispatch starts on its own once the handshake completes.
    pub async fn activate(&self) -> Result<(), SessionError> {
        let session = &self.session;
        {
            let mut core = session.core.lock();
            if core.state != SessionState::Created {
                return Err(SessionError::AlreadyActivated);
            }
            core.state = SessionState::Handshaking;
            core.started_at = Some(Instant::now());
        }

        tracing::info!(
            workflow = session.workflow.name(),
            endpoint = %session.config.endpoint.address(),
            client_id = session.config.endpoint.client_id,
            targets = session.workflow.targets().len(),
            "Activating session"
        );

        let timer = tokio::spawn(Arc::clone(session).deadline());
        session.tasks.lock().push(timer);

        let connect = session
            .transport
            .connect(&session.config.endpoint, session.config.event_capacity);
        let connected = tokio::select! {
            result = connect => result,
            () = session.cancel.cancelled() => Err(TransportError::Closed),
        };

        let events = match connected {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Gateway connection failed");
                session.stop(StopReason::ConnectionClosed);
                return Err(SessionError::Connect(e));
            }
        };

        let listener = tokio::spawn(Arc::clone(session).listen(events));
        session.tasks.lock().push(listener);
        Ok(())
    }

    /// Wait for every session task to finish and return the ledger.
    ///
    /// Returns an error only for internal faults, never for gateway
    /// rejections.
    pub async fn wait_for_completion(&self) -> Result<SessionOutcome, SessionError> {
        if self.session.state() == SessionState::Created {
            return Err(SessionError::NotActivated);
        }

        let mut task_error = None;
        loop {
            let handles = std::mem::take(&mut *self.session.tasks.lock());
            if handles.is_empty() {
                break;
            }
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Session task failed");
                    self.session.stop(StopReason::Requested);
                    task_error.get_or_insert(e.to_string());
                }
            }
        }

        if let Some(e) = task_error {
            return Err(SessionError::Task(e));
        }
        self.session.outcome()
    }

    /// Stop the session.
    pub fn stop(&self, reason: StopReason) {
        self.session.stop(reason);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Shared session state.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session<W>> {
        &self.session
    }

    /// Run `f` over the workflow's correlation state.
    ///
    /// `f` runs under the session lock and must not call back into this
    /// proxy or its session; the lock is not reentrant and doing so
    /// deadlocks. Copy out what you need and act on it afterwards.
    pub fn with_book<R>(&self, f: impl FnOnce(&mut W::Book) -> R) -> R {
        self.session.with_book(f)
    }
}
