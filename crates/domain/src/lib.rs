//! Domain-level building blocks shared by the consumer and storage crates.
//!
//! Holds the chain data model, the CryptoNote key primitives and output
//! matcher, the duplicate output key ledger, the transfer container contract,
//! and the environment-driven configuration and telemetry helpers.

pub mod config;
pub mod crypto;
pub mod matcher;
pub mod model;
pub mod services;
pub mod storage;

pub use config::*;
pub use crypto::{generate_key_derivation, generate_key_image, KeyDerivation};
pub use matcher::{find_owned_outputs, OwnedOutput, OwnedOutputs};
pub use model::*;
pub use services::*;
pub use storage::*;
