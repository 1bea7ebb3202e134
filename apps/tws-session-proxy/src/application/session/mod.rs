//! Session Runtime
//!
//! The session proxy, the workflow seam it drives, and the fixed table that
//! classifies gateway error codes.

mod errors;
mod proxy;
mod workflow;

pub use errors::{
    ErrorClass, IGNORED_CODES, SESSION_DEAD_CODES, SessionError, SessionFault,
    TRANSPORT_SEVERED_CODES, WorkflowError,
};
pub use proxy::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_PACING_DELAY, DEFAULT_TIMEOUT, Session, SessionConfig,
    SessionOutcome, SessionProxy,
};
pub use workflow::{AMBIGUOUS_CODE, NOT_SENT_CODE, SINK_FAILED_CODE, UNRESOLVED_CODE, Workflow};
