// tests/util.rs
// Shared helpers for the integration tests

#![allow(dead_code)]

use ledger_sentinel::core::logging::init_logging;
use ledger_sentinel::{BlockContext, EngineConfig, GenesisState, MemoryStore, RiskEngine};

pub const GENESIS_TIME: i64 = 1_700_000_000;

pub fn block(height: i64, offset_secs: i64) -> BlockContext {
    BlockContext::at_unix(height, GENESIS_TIME + offset_secs).expect("valid block time")
}

/// Engine with `genesis` imported and committed
pub fn engine_with(genesis: &GenesisState) -> RiskEngine<MemoryStore> {
    init_logging("warn");
    let mut engine = RiskEngine::new(MemoryStore::new(), EngineConfig::default()).expect("default config");
    engine.init_genesis(genesis).expect("genesis import");
    engine.commit().expect("genesis commit");
    engine
}

pub fn default_engine() -> RiskEngine<MemoryStore> {
    engine_with(&GenesisState::default())
}
