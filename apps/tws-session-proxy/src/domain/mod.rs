//! Domain Layer - Request correlation and gateway value types.
//!
//! This layer contains the request tracker, the response accumulator and
//! the contract / order types exchanged with the gateway. Nothing here
//! performs I/O or takes a lock.

/// Request ids, filed operations and error responses.
pub mod request;

/// Request-id allocation and outcome ledgers.
pub mod tracker;

/// Partial response buffering.
pub mod accumulator;

/// Session lifecycle states and stop reasons.
pub mod session;

/// Contract lookup inputs and results.
pub mod contract;

/// Order tickets, records and callbacks.
pub mod order;
