//! Shared service helpers: the duplicate output key ledger and telemetry wiring.

pub mod ledger;
pub mod telemetry;

pub use ledger::*;
pub use telemetry::*;
