//! Inputs supplied by the ledger runtime: block context and transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SentinelError};

/// Largest accepted transaction amount or latency (10^24).
///
/// Window sums over a capped history stay far below `Decimal::MAX`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_701_131_776, 466_537_709, 54_210, false, 0);

/// Height and time of the block currently being processed.
///
/// This is the only clock the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub height: i64,
    pub time: DateTime<Utc>,
}

impl BlockContext {
    pub fn new(height: i64, time: DateTime<Utc>) -> Self {
        Self { height, time }
    }

    /// Build a context from a unix timestamp in seconds
    pub fn at_unix(height: i64, secs: i64) -> Result<Self> {
        let time = DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
            SentinelError::InvalidArgument(format!("block time {} out of range", secs))
        })?;
        Ok(Self { height, time })
    }
}

/// A transaction as delivered by the ledger, in block order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    pub hash: String,
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
    pub amount: Decimal,
    /// Ledger module that executed the message
    #[serde(default = "TransactionData::default_module")]
    pub module: String,
    #[serde(default = "TransactionData::default_success")]
    pub success: bool,
    /// Execution latency reported by the runtime
    #[serde(default)]
    pub latency_ms: Decimal,
    /// Region code supplied with the block, if any
    #[serde(default)]
    pub location: Option<String>,
    /// Declared jurisdiction used by compliance rules
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

impl TransactionData {
    fn default_module() -> String {
        "bank".to_string()
    }

    fn default_success() -> bool {
        true
    }

    pub fn new(hash: impl Into<String>, from_address: impl Into<String>, amount: Decimal) -> Self {
        Self {
            hash: hash.into(),
            from_address: from_address.into(),
            to_address: String::new(),
            amount,
            module: Self::default_module(),
            success: true,
            latency_ms: Decimal::ZERO,
            location: None,
            jurisdiction: None,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>, success: bool, latency_ms: Decimal) -> Self {
        self.module = module.into();
        self.success = success;
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    /// Reject transactions the engine cannot score
    pub fn validate(&self) -> Result<()> {
        if self.hash.trim().is_empty() {
            return Err(SentinelError::InvalidArgument("transaction hash cannot be empty".into()));
        }
        if self.from_address.trim().is_empty() {
            return Err(SentinelError::InvalidArgument("sender address cannot be empty".into()));
        }
        // addresses are embedded in store keys
        if self.from_address.contains('/') {
            return Err(SentinelError::InvalidArgument(format!(
                "sender address {} contains '/'",
                self.from_address
            )));
        }
        if self.amount.is_sign_negative() {
            return Err(SentinelError::InvalidArgument(format!(
                "transaction amount {} cannot be negative",
                self.amount
            )));
        }
        if self.amount > MAX_AMOUNT {
            return Err(SentinelError::InvalidArgument(format!(
                "transaction amount {} exceeds {}",
                self.amount, MAX_AMOUNT
            )));
        }
        if self.latency_ms.is_sign_negative() {
            return Err(SentinelError::InvalidArgument("latency cannot be negative".into()));
        }
        if self.latency_ms > MAX_AMOUNT {
            return Err(SentinelError::InvalidArgument(format!("latency {} out of range", self.latency_ms)));
        }
        Ok(())
    }
}
