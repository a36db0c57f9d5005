//! Record encoding for persisted state.
//!
//! Records are JSON. Struct fields serialize in declaration order and every
//! map is a `BTreeMap`, so equal values always produce equal bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::KvStore;
use crate::core::errors::{Result, SentinelError};

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| SentinelError::corruption(key, e))
}

/// Point read. Undecodable bytes are corruption and fatal.
pub fn load<T, S>(store: &S, key: &[u8]) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    match store.get(key)? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub fn save<T, S>(store: &mut S, key: &[u8], value: &T) -> Result<()>
where
    T: Serialize,
    S: KvStore + ?Sized,
{
    store.set(key, encode(value)?)
}

/// Prefix scan. Records that fail to decode are logged and skipped.
pub fn scan<T, S>(store: &S, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    let entries = store.iter_prefix(prefix)?;
    let mut out = Vec::with_capacity(entries.len());
    for (key, bytes) in entries {
        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => out.push((key, value)),
            Err(e) => {
                warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "skipping malformed record"
                );
            }
        }
    }
    Ok(out)
}

/// Prefix scan returning values only
pub fn scan_values<T, S>(store: &S, prefix: &[u8]) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    Ok(scan(store, prefix)?.into_iter().map(|(_, v)| v).collect())
}
