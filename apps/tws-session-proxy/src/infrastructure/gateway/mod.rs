//! Gateway Adapters
//!
//! Implementations of `GatewayTransport`:
//!
//! - `TcpGateway`: a TWS / IB Gateway socket
//! - `ScriptedGateway`: an in-memory script for tests and dry runs

/// Length-prefixed field framing.
pub mod codec;

/// Message ids and field layouts.
pub mod messages;

/// In-memory scripted gateway.
pub mod mock;

/// TCP socket transport.
pub mod tcp;

pub use codec::{FrameCodec, FrameError};
pub use mock::ScriptedGateway;
pub use tcp::TcpGateway;
