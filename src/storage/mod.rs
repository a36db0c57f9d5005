//! Storage abstraction
//!
//! The engine persists all of its state in an ordered key-value store supplied
//! by the ledger runtime. Writes made during a block stay pending until the
//! runtime commits the block, and vanish if it rolls back.

pub mod codec;
pub mod keys;
pub mod memory;

pub use memory::MemoryStore;

use crate::core::errors::Result;

/// Ordered key-value store with prefix iteration
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in ascending key order
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// A store whose writes are applied atomically per block
pub trait BlockStore: KvStore {
    /// Make every pending write durable
    fn commit(&mut self) -> Result<()>;

    /// Discard every write made since the last commit
    fn rollback(&mut self);
}
