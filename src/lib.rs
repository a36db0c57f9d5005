#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]
// src/lib.rs
//! Deterministic metrics, alerting and transaction risk scoring for a
//! replicated ledger state machine.
//!
//! Every component reads and writes through a [`storage::BlockStore`] and
//! takes time from the [`core::BlockContext`], so replicas that process the
//! same blocks end with byte-identical state.

pub mod api;
pub mod core;
pub mod storage;

// Behavioral threat scoring
pub mod anomaly_detection;

// Metrics store, alert evaluation and exposition
pub mod monitoring;

pub mod audit;
pub mod security;
pub mod service;

pub use crate::core::{BlockContext, EngineConfig, Result, SentinelError, TransactionData};
pub use crate::service::{GenesisState, RiskEngine, TransactionOutcome};
pub use crate::storage::{BlockStore, KvStore, MemoryStore};
