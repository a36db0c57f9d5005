pub mod engine;
pub mod genesis;

// Re-export so callers can use `crate::service::RiskEngine`
pub use engine::{RiskEngine, TransactionOutcome};
pub use genesis::{AddressTransaction, GenesisState};
