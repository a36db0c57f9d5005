use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::labels::Labels;

/// Monotonic counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub value: u64,
    #[serde(default)]
    pub labels: Labels,
}

/// Last-write-wins decimal gauge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub name: String,
    pub value: Decimal,
    #[serde(default)]
    pub labels: Labels,
    /// Block time of the last write, `None` if never written
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound; `None` is the +Inf bucket
    pub upper_bound: Option<Decimal>,
    /// Observations in this bucket only (not cumulative)
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    pub buckets: Vec<HistogramBucket>,
    pub sum: Decimal,
    pub count: u64,
}

impl Histogram {
    pub fn empty(name: &str, labels: Labels, bounds: &[Decimal]) -> Self {
        let mut buckets: Vec<HistogramBucket> = bounds
            .iter()
            .map(|b| HistogramBucket { upper_bound: Some(*b), count: 0 })
            .collect();
        buckets.push(HistogramBucket { upper_bound: None, count: 0 });
        Self {
            name: name.to_string(),
            labels,
            buckets,
            sum: Decimal::ZERO,
            count: 0,
        }
    }

    pub fn observe(&mut self, value: Decimal) {
        let slot = self
            .buckets
            .iter()
            .position(|b| b.upper_bound.map_or(true, |ub| value <= ub));
        if let Some(i) = slot {
            self.buckets[i].count += 1;
        }
        self.sum = self.sum.saturating_add(value);
        self.count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// More than 10% failures is unhealthy, more than 5% degraded
    pub fn from_error_rate(rate: Decimal) -> Self {
        if rate > Decimal::new(10, 2) {
            HealthStatus::Unhealthy
        } else if rate > Decimal::new(5, 2) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Numeric form for exposition: 1 healthy, 0.5 degraded, 0 unhealthy
    pub fn score(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleHealth {
    pub module: String,
    pub status: HealthStatus,
    /// `failures / transactions`, recomputed on every update
    pub error_rate: Decimal,
    /// Mean latency over all recorded transactions
    pub latency_ms: Decimal,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    pub transactions: u64,
    pub failures: u64,
    #[serde(default)]
    pub total_latency_ms: Decimal,
}

impl ModuleHealth {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            status: HealthStatus::Healthy,
            error_rate: Decimal::ZERO,
            latency_ms: Decimal::ZERO,
            last_error: None,
            last_error_at: None,
            transactions: 0,
            failures: 0,
            total_latency_ms: Decimal::ZERO,
        }
    }

    pub(crate) fn recompute(&mut self) {
        if self.transactions == 0 {
            self.error_rate = Decimal::ZERO;
            self.latency_ms = Decimal::ZERO;
        } else {
            let n = Decimal::from(self.transactions);
            self.error_rate = (Decimal::from(self.failures) / n).round_dp(8);
            self.latency_ms = (self.total_latency_ms / n).round_dp(4);
        }
        self.status = HealthStatus::from_error_rate(self.error_rate);
    }
}

/// Block timing persisted under `block/stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    pub last_block_height: i64,
    pub last_block_time: Option<DateTime<Utc>>,
    pub average_block_time_ms: Decimal,
}

/// Aggregate view assembled from counters, gauges and records at read time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub last_block_height: i64,
    pub last_block_time: Option<DateTime<Utc>>,
    pub average_block_time_ms: Decimal,
    pub transactions_total: u64,
    #[serde(default)]
    pub module_health: BTreeMap<String, ModuleHealth>,

    pub total_collateral_value: Decimal,
    pub total_debt_value: Decimal,
    pub system_collateral_ratio: Decimal,

    pub total_settlements: u64,
    pub total_settlement_volume: u64,
    pub active_escrows: u64,
    pub active_channels: u64,

    pub prices_updated: u64,
    pub stale_price_count: u64,

    pub circuit_trips: u64,
    pub rate_limit_hits: u64,
    pub compliance_blocks: u64,
}

impl SystemMetrics {
    pub fn block_stats(&self) -> BlockStats {
        BlockStats {
            last_block_height: self.last_block_height,
            last_block_time: self.last_block_time,
            average_block_time_ms: self.average_block_time_ms,
        }
    }

    /// Highest error rate across modules, 0 with no modules
    pub fn max_module_error_rate(&self) -> Decimal {
        self.module_health
            .values()
            .map(|h| h.error_rate)
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_thresholds() {
        assert_eq!(HealthStatus::from_error_rate(Decimal::new(5, 2)), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(Decimal::new(6, 2)), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(Decimal::new(10, 2)), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(Decimal::new(11, 2)), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_histogram_observe() {
        let bounds = [Decimal::from(10), Decimal::from(100)];
        let mut h = Histogram::empty("tx_amount", Labels::new(), &bounds);
        h.observe(Decimal::from(10));
        h.observe(Decimal::from(50));
        h.observe(Decimal::from(5000));
        let counts: Vec<u64> = h.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert_eq!(h.count, 3);
        assert_eq!(h.sum, Decimal::from(5060));
    }

    #[test]
    fn test_module_health_recompute() {
        let mut h = ModuleHealth::new("bank");
        h.transactions = 20;
        h.failures = 3;
        h.total_latency_ms = Decimal::from(200);
        h.recompute();
        assert_eq!(h.error_rate, Decimal::new(15, 2));
        assert_eq!(h.latency_ms, Decimal::from(10));
        assert_eq!(h.status, HealthStatus::Unhealthy);
    }
}
