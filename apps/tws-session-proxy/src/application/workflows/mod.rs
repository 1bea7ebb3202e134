//! Concrete Workflows
//!
//! - `ContractResolutionWorkflow`: contract lookups, one candidate required
//! - `OrderPlacementWorkflow`: order submission and acknowledgement

mod contract_resolution;
mod order_placement;

pub use contract_resolution::{ContractResolutionWorkflow, Resolution, ResolutionBook};
pub use order_placement::{OrderBook, OrderPlacementWorkflow};
