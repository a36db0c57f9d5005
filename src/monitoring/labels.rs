//! Label sets and their canonical storage form.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::core::errors::{Result, SentinelError};

/// A label set. Insertion order is irrelevant: entries are held sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Storage form: `k1=v1,k2=v2` with keys ascending.
    ///
    /// `\`, `,` and `=` inside keys or values are backslash escaped so
    /// distinct label sets never collide.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_into(&mut out, k);
            out.push('=');
            escape_into(&mut out, v);
        }
        out
    }
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.canonical())
    }
}

impl From<HashMap<String, String>> for Labels {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Labels {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Metric names follow the Prometheus grammar `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn validate_metric_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SentinelError::InvalidArgument(format!("invalid metric name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_irrelevant() {
        let a = Labels::new().with("module", "bank").with("denom", "uatom");
        let b = Labels::new().with("denom", "uatom").with("module", "bank");
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "denom=uatom,module=bank");
    }

    #[test]
    fn test_escaping_prevents_collisions() {
        let a = Labels::from([("a", "1,b=2")]);
        let b = Labels::from([("a", "1"), ("b", "2")]);
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_empty_labels() {
        assert_eq!(Labels::new().canonical(), "");
        assert!(Labels::new().is_empty());
    }

    #[test]
    fn test_metric_name_validation() {
        assert!(validate_metric_name("transactions_total").is_ok());
        assert!(validate_metric_name("ns:sub_metric").is_ok());
        assert!(validate_metric_name("9lives").is_err());
        assert!(validate_metric_name("has-dash").is_err());
        assert!(validate_metric_name("").is_err());
    }
}
