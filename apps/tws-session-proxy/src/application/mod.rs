//! Application Layer - Session runtime, workflows and port definitions.
//!
//! This layer drives a gateway session through the ports it defines and
//! hosts the two concrete workflows run over it.

/// Port interfaces for the gateway and the persistence collaborators.
pub mod ports;

/// Session proxy, workflow trait and error classification.
pub mod session;

/// Contract resolution and order placement.
pub mod workflows;
