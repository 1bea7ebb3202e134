//! Workflow Trait
//!
//! A workflow is one exchange pattern run over a session: it names its
//! targets, turns each into a request, and handles the response families the
//! session does not handle itself (everything except handshake, errors and
//! connection loss).

use std::fmt::Debug;

use serde::Serialize;

use super::errors::{SessionFault, WorkflowError};
use super::proxy::Session;
use crate::application::ports::{GatewayEvent, GatewayRequest};
use crate::domain::request::RequestId;

/// Local code for a lookup that matched no contract.
pub const UNRESOLVED_CODE: i32 = 8888;

/// Local code for a lookup that matched more than one contract.
pub const AMBIGUOUS_CODE: i32 = 8887;

/// Local code for a response the persistence collaborator refused.
pub const SINK_FAILED_CODE: i32 = 8889;

/// Local code for a target that was never sent.
pub const NOT_SENT_CODE: i32 = 8886;

/// One business exchange pattern run over a session.
pub trait Workflow: Send + Sync + Sized + 'static {
    /// One unit of work.
    type Target: Serialize + Debug + Send + Sync;

    /// Partial response buffered per request id.
    type Fragment: Send + 'static;

    /// Correlation state kept under the session lock.
    type Book: Default + Send + 'static;

    /// Label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Work items, dispatched in order.
    fn targets(&self) -> &[Self::Target];

    /// Build the request for `target` under `id` and record whatever is
    /// needed to correlate its responses.
    ///
    /// Called with the session lock held. On error the target is filed as
    /// failed and nothing is sent.
    fn prepare(
        &self,
        id: RequestId,
        target: &Self::Target,
        book: &mut Self::Book,
    ) -> Result<GatewayRequest, WorkflowError>;

    /// Trailing request sent once every target has been dispatched.
    ///
    /// When one is sent the session no longer stops on idle; `on_event` must
    /// stop it when the trailing response ends, or the deadline will.
    fn after_dispatch(&self) -> Option<GatewayRequest> {
        None
    }

    /// Handle a workflow-specific inbound event. Called without the lock.
    fn on_event(&self, event: GatewayEvent, session: &Session<Self>) -> Result<(), SessionFault>;
}
