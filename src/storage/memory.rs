use std::collections::BTreeMap;

use tracing::debug;

use super::{BlockStore, KvStore};
use crate::core::errors::Result;

/// In-memory ordered store with a pending write overlay.
///
/// Reads see pending writes on top of committed data. `None` in the overlay
/// marks a pending delete.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending (uncommitted) writes
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.pending.get(key) {
            return Ok(entry.clone());
        }
        Ok(self.committed.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.pending.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<&[u8], &[u8]> = self
            .committed
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();

        for (k, v) in self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match v {
                Some(v) => {
                    merged.insert(k.as_slice(), v.as_slice());
                }
                None => {
                    merged.remove(k.as_slice());
                }
            }
        }

        Ok(merged
            .into_iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }
}

impl BlockStore for MemoryStore {
    fn commit(&mut self) -> Result<()> {
        let writes = std::mem::take(&mut self.pending);
        debug!(writes = writes.len(), "committing pending writes");
        for (key, value) in writes {
            match value {
                Some(v) => {
                    self.committed.insert(key, v);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        debug!(writes = self.pending.len(), "discarding pending writes");
        self.pending.clear();
    }
}
