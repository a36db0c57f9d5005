//! Per-address window of recent transactions.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::errors::Result;
use crate::storage::{codec, keys, KvStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    pub amount: Decimal,
    pub height: i64,
    /// Position of the transaction inside its block
    pub seq: u64,
    pub time: DateTime<Utc>,
}

/// Store-backed transaction window, oldest first
#[derive(Debug, Clone, Copy)]
pub struct TransactionHistory {
    retention: Duration,
    max_entries: usize,
}

impl TransactionHistory {
    pub fn new(retention_secs: i64, max_entries: usize) -> Self {
        Self {
            retention: Duration::seconds(retention_secs),
            max_entries,
        }
    }

    /// All retained records for `address` in (height, seq) order
    pub fn load<S: KvStore + ?Sized>(&self, store: &S, address: &str) -> Result<Vec<TxRecord>> {
        codec::scan_values(store, &keys::tx_history_prefix(address))
    }

    /// Append `record` and prune entries outside the retention window
    pub fn append<S: KvStore + ?Sized>(&self, store: &mut S, address: &str, record: &TxRecord) -> Result<()> {
        codec::save(store, &keys::tx_history(address, record.height, record.seq), record)?;

        let cutoff = record.time - self.retention;
        let entries = store.iter_prefix(&keys::tx_history_prefix(address))?;
        let excess = entries.len().saturating_sub(self.max_entries);
        let mut pruned = 0usize;
        for (i, (key, bytes)) in entries.iter().enumerate() {
            let stale = match serde_json::from_slice::<TxRecord>(bytes) {
                Ok(r) => r.time < cutoff,
                Err(_) => true,
            };
            if i < excess || stale {
                store.delete(key)?;
                pruned += 1;
            } else {
                break;
            }
        }
        if pruned > 0 {
            trace!(address, pruned, "transaction window pruned");
        }
        Ok(())
    }

    pub fn all<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<(String, TxRecord)>> {
        Ok(codec::scan::<TxRecord, _>(store, keys::TX_HISTORY.as_bytes())?
            .into_iter()
            .filter_map(|(key, rec)| {
                let key = String::from_utf8(key).ok()?;
                let rest = key.strip_prefix(keys::TX_HISTORY)?;
                let address = rest.split('/').next()?.to_string();
                Some((address, rec))
            })
            .collect())
    }
}

/// Records with `time > now - window`
pub fn within(records: &[TxRecord], now: DateTime<Utc>, window: Duration) -> Vec<&TxRecord> {
    let cutoff = now - window;
    records.iter().filter(|r| r.time > cutoff).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn record(height: i64, seq: u64, secs: i64) -> TxRecord {
        TxRecord {
            hash: format!("h{}-{}", height, seq),
            amount: Decimal::from(100),
            height,
            seq,
            time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_append_keeps_chronological_order() {
        let mut store = MemoryStore::new();
        let history = TransactionHistory::new(3600, 100);
        history.append(&mut store, "a1", &record(10, 0, 0)).unwrap();
        history.append(&mut store, "a1", &record(9, 3, -5)).unwrap();
        history.append(&mut store, "a1", &record(10, 1, 1)).unwrap();
        let heights: Vec<(i64, u64)> = history
            .load(&store, "a1")
            .unwrap()
            .iter()
            .map(|r| (r.height, r.seq))
            .collect();
        assert_eq!(heights, vec![(9, 3), (10, 0), (10, 1)]);
    }

    #[test]
    fn test_retention_prunes_old_entries() {
        let mut store = MemoryStore::new();
        let history = TransactionHistory::new(60, 100);
        history.append(&mut store, "a1", &record(1, 0, 0)).unwrap();
        history.append(&mut store, "a1", &record(2, 0, 30)).unwrap();
        history.append(&mut store, "a1", &record(3, 0, 90)).unwrap();
        let kept = history.load(&store, "a1").unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].height, 2);
    }

    #[test]
    fn test_max_entries_cap() {
        let mut store = MemoryStore::new();
        let history = TransactionHistory::new(86_400, 3);
        for i in 0..5 {
            history.append(&mut store, "a1", &record(i, 0, i)).unwrap();
        }
        let kept = history.load(&store, "a1").unwrap();
        assert_eq!(kept.iter().map(|r| r.height).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_addresses_isolated() {
        let mut store = MemoryStore::new();
        let history = TransactionHistory::new(3600, 10);
        history.append(&mut store, "a1", &record(1, 0, 0)).unwrap();
        history.append(&mut store, "a10", &record(1, 1, 0)).unwrap();
        assert_eq!(history.load(&store, "a1").unwrap().len(), 1);
        let all = history.all(&store).unwrap();
        assert_eq!(all[0].0, "a1");
        assert_eq!(all[1].0, "a10");
    }
}
