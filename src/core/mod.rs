pub mod config;
pub mod context;
pub mod errors;
pub mod logging;
pub mod math;

pub use config::EngineConfig;
pub use context::{BlockContext, TransactionData};
pub use errors::{Result, SentinelError};
