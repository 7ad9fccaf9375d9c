// Workflow decision machine and lock consistency checks

pub mod consistency;
pub mod state_machine;

pub use consistency::{audit_store, check_asset, validate, Inconsistency};
pub use state_machine::{resolve, DecisionMachine};
