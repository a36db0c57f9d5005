//! Label-keyed metric storage.
//!
//! Every metric lives in the block store under `{family}/{name}/{labels}`.
//! Aggregate figures are never stored separately; [`MetricStore::system_metrics`]
//! sums the backing entries on each read.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::labels::{validate_metric_name, Labels};
use super::types::{BlockStats, Counter, Gauge, Histogram, ModuleHealth, SystemMetrics};
use crate::core::config::MetricsConfig;
use crate::core::context::BlockContext;
use crate::core::errors::{Result, SentinelError};
use crate::storage::{codec, keys, KvStore};

/// Well-known metric names written by the recorders
pub mod names {
    pub const TRANSACTIONS_SUCCESS: &str = "transactions_success";
    pub const TRANSACTIONS_FAILED: &str = "transactions_failed";
    pub const TRANSACTION_AMOUNT: &str = "transaction_amount";
    pub const SETTLEMENTS_TOTAL: &str = "settlements_total";
    pub const SETTLEMENT_VOLUME_TOTAL: &str = "settlement_volume_total";
    pub const PRICE_UPDATES: &str = "price_updates";
    pub const CIRCUIT_TRIPS: &str = "circuit_trips";
    pub const RATE_LIMIT_HITS: &str = "rate_limit_hits";
    pub const COMPLIANCE_BLOCKS: &str = "compliance_blocks";
    pub const TOTAL_COLLATERAL_VALUE: &str = "total_collateral_value";
    pub const TOTAL_DEBT_VALUE: &str = "total_debt_value";
    pub const SYSTEM_COLLATERAL_RATIO: &str = "system_collateral_ratio";
    pub const ACTIVE_ESCROWS: &str = "active_escrows";
    pub const ACTIVE_CHANNELS: &str = "active_channels";
    pub const STALE_PRICE_COUNT: &str = "stale_price_count";
}

/// Counters, gauges and histograms plus block and module-health records
#[derive(Debug, Clone)]
pub struct MetricStore {
    config: MetricsConfig,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricStore {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    // ---- counters ----

    /// Current value, zero if never written
    pub fn get_counter<S: KvStore + ?Sized>(
        &self,
        store: &S,
        name: &str,
        labels: &Labels,
    ) -> Result<Counter> {
        validate_metric_name(name)?;
        let key = keys::metric(keys::COUNTER, name, &labels.canonical());
        Ok(codec::load(store, &key)?.unwrap_or_else(|| Counter {
            name: name.to_string(),
            value: 0,
            labels: labels.clone(),
        }))
    }

    pub fn increment_counter<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        name: &str,
        labels: &Labels,
    ) -> Result<u64> {
        self.add_to_counter(store, name, labels, 1)
    }

    /// Read-modify-write. Saturates at `u64::MAX`.
    pub fn add_to_counter<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        name: &str,
        labels: &Labels,
        delta: u64,
    ) -> Result<u64> {
        let mut counter = self.get_counter(store, name, labels)?;
        counter.value = counter.value.saturating_add(delta);
        self.set_counter(store, &counter)?;
        trace!(name, labels = %labels, value = counter.value, "counter updated");
        Ok(counter.value)
    }

    /// Overwrite a counter. Only genesis import calls this.
    pub fn set_counter<S: KvStore + ?Sized>(&self, store: &mut S, counter: &Counter) -> Result<()> {
        validate_metric_name(&counter.name)?;
        let key = keys::metric(keys::COUNTER, &counter.name, &counter.labels.canonical());
        codec::save(store, &key, counter)
    }

    /// Every label set of one counter, in canonical label order
    pub fn counters<S: KvStore + ?Sized>(&self, store: &S, name: &str) -> Result<Vec<Counter>> {
        validate_metric_name(name)?;
        codec::scan_values(store, &keys::metric_prefix(keys::COUNTER, name))
    }

    pub fn sum_counter<S: KvStore + ?Sized>(&self, store: &S, name: &str) -> Result<u64> {
        Ok(self
            .counters(store, name)?
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.value)))
    }

    pub fn all_counters<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<Counter>> {
        codec::scan_values(store, keys::COUNTER.as_bytes())
    }

    // ---- gauges ----

    pub fn get_gauge<S: KvStore + ?Sized>(
        &self,
        store: &S,
        name: &str,
        labels: &Labels,
    ) -> Result<Gauge> {
        validate_metric_name(name)?;
        let key = keys::metric(keys::GAUGE, name, &labels.canonical());
        Ok(codec::load(store, &key)?.unwrap_or_else(|| Gauge {
            name: name.to_string(),
            value: Decimal::ZERO,
            labels: labels.clone(),
            updated_at: None,
        }))
    }

    /// Last write wins; `updated_at` is the block time
    pub fn update_gauge<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        name: &str,
        labels: &Labels,
        value: Decimal,
    ) -> Result<()> {
        let gauge = Gauge {
            name: name.to_string(),
            value,
            labels: labels.clone(),
            updated_at: Some(ctx.time),
        };
        self.set_gauge(store, &gauge)
    }

    pub fn set_gauge<S: KvStore + ?Sized>(&self, store: &mut S, gauge: &Gauge) -> Result<()> {
        validate_metric_name(&gauge.name)?;
        let key = keys::metric(keys::GAUGE, &gauge.name, &gauge.labels.canonical());
        codec::save(store, &key, gauge)
    }

    pub fn all_gauges<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<Gauge>> {
        codec::scan_values(store, keys::GAUGE.as_bytes())
    }

    fn gauge_value<S: KvStore + ?Sized>(&self, store: &S, name: &str) -> Result<Decimal> {
        Ok(self.get_gauge(store, name, &Labels::new())?.value)
    }

    fn gauge_count<S: KvStore + ?Sized>(&self, store: &S, name: &str) -> Result<u64> {
        Ok(self.gauge_value(store, name)?.to_u64().unwrap_or(0))
    }

    // ---- histograms ----

    pub fn get_histogram<S: KvStore + ?Sized>(
        &self,
        store: &S,
        name: &str,
        labels: &Labels,
    ) -> Result<Histogram> {
        validate_metric_name(name)?;
        let key = keys::metric(keys::HISTOGRAM, name, &labels.canonical());
        Ok(codec::load(store, &key)?
            .unwrap_or_else(|| Histogram::empty(name, labels.clone(), &self.config.histogram_buckets)))
    }

    pub fn observe_histogram<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        name: &str,
        labels: &Labels,
        value: Decimal,
    ) -> Result<()> {
        let mut histogram = self.get_histogram(store, name, labels)?;
        histogram.observe(value);
        self.set_histogram(store, &histogram)
    }

    pub fn set_histogram<S: KvStore + ?Sized>(&self, store: &mut S, histogram: &Histogram) -> Result<()> {
        validate_metric_name(&histogram.name)?;
        let key = keys::metric(keys::HISTOGRAM, &histogram.name, &histogram.labels.canonical());
        codec::save(store, &key, histogram)
    }

    pub fn all_histograms<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<Histogram>> {
        codec::scan_values(store, keys::HISTOGRAM.as_bytes())
    }

    // ---- block metrics ----

    pub fn block_stats<S: KvStore + ?Sized>(&self, store: &S) -> Result<BlockStats> {
        Ok(codec::load(store, keys::BLOCK_STATS.as_bytes())?.unwrap_or_default())
    }

    pub fn set_block_stats<S: KvStore + ?Sized>(&self, store: &mut S, stats: &BlockStats) -> Result<()> {
        codec::save(store, keys::BLOCK_STATS.as_bytes(), stats)
    }

    /// Record the new block and fold its interval into the moving average
    pub fn update_block_metrics<S: KvStore + ?Sized>(&self, store: &mut S, ctx: &BlockContext) -> Result<()> {
        let mut stats = self.block_stats(store)?;
        match stats.last_block_time {
            Some(last) if stats.last_block_height > 0 => {
                let interval = Decimal::from((ctx.time - last).num_milliseconds());
                stats.average_block_time_ms = if stats.average_block_time_ms.is_zero() {
                    interval
                } else {
                    let alpha = self.config.block_time_alpha;
                    (stats.average_block_time_ms * (Decimal::ONE - alpha) + interval * alpha)
                        .round_dp(4)
                };
            }
            _ => {}
        }
        stats.last_block_height = ctx.height;
        stats.last_block_time = Some(ctx.time);
        debug!(height = ctx.height, avg_ms = %stats.average_block_time_ms, "block metrics updated");
        self.set_block_stats(store, &stats)
    }

    // ---- module health ----

    pub fn get_module_health<S: KvStore + ?Sized>(&self, store: &S, module: &str) -> Result<Option<ModuleHealth>> {
        codec::load(store, &keys::module_health(module))
    }

    pub fn set_module_health<S: KvStore + ?Sized>(&self, store: &mut S, health: &ModuleHealth) -> Result<()> {
        codec::save(store, &keys::module_health(&health.module), health)
    }

    pub fn module_health<S: KvStore + ?Sized>(&self, store: &S) -> Result<BTreeMap<String, ModuleHealth>> {
        Ok(codec::scan_values::<ModuleHealth, _>(store, keys::MODULE_HEALTH.as_bytes())?
            .into_iter()
            .map(|h| (h.module.clone(), h))
            .collect())
    }

    /// Count one executed transaction against its module
    pub fn record_transaction<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        module: &str,
        success: bool,
        latency_ms: Decimal,
    ) -> Result<()> {
        if module.is_empty() {
            return Err(SentinelError::InvalidArgument("module cannot be empty".into()));
        }
        let outcome = if success { names::TRANSACTIONS_SUCCESS } else { names::TRANSACTIONS_FAILED };
        self.increment_counter(store, outcome, &Labels::from([("module", module)]))?;

        let mut health = self
            .get_module_health(store, module)?
            .unwrap_or_else(|| ModuleHealth::new(module));
        health.transactions += 1;
        if !success {
            health.failures += 1;
        }
        health.total_latency_ms = health.total_latency_ms.saturating_add(latency_ms);
        health.recompute();
        self.set_module_health(store, &health)
    }

    /// A failed operation with a message; counts as a failed transaction
    pub fn record_module_error<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        module: &str,
        message: &str,
    ) -> Result<()> {
        if module.is_empty() {
            return Err(SentinelError::InvalidArgument("module cannot be empty".into()));
        }
        self.increment_counter(store, names::TRANSACTIONS_FAILED, &Labels::from([("module", module)]))?;
        let mut health = self
            .get_module_health(store, module)?
            .unwrap_or_else(|| ModuleHealth::new(module));
        health.transactions += 1;
        health.failures += 1;
        health.last_error = Some(message.to_string());
        health.last_error_at = Some(ctx.time);
        health.recompute();
        debug!(module, status = %health.status, "module error recorded");
        self.set_module_health(store, &health)
    }

    // ---- economic / settlement / oracle / security recorders ----

    pub fn update_collateral_metrics<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        total_collateral: Decimal,
        total_debt: Decimal,
    ) -> Result<()> {
        let ratio = if total_debt.is_zero() {
            Decimal::ZERO
        } else {
            total_collateral
                .checked_div(total_debt)
                .map(|r| r.round_dp(18))
                .unwrap_or(Decimal::ZERO)
        };
        let none = Labels::new();
        self.update_gauge(store, ctx, names::TOTAL_COLLATERAL_VALUE, &none, total_collateral)?;
        self.update_gauge(store, ctx, names::TOTAL_DEBT_VALUE, &none, total_debt)?;
        self.update_gauge(store, ctx, names::SYSTEM_COLLATERAL_RATIO, &none, ratio)
    }

    pub fn record_settlement<S: KvStore + ?Sized>(&self, store: &mut S, amount: u64) -> Result<()> {
        let none = Labels::new();
        self.increment_counter(store, names::SETTLEMENTS_TOTAL, &none)?;
        self.add_to_counter(store, names::SETTLEMENT_VOLUME_TOTAL, &none, amount)?;
        Ok(())
    }

    pub fn update_active_escrows<S: KvStore + ?Sized>(&self, store: &mut S, ctx: &BlockContext, count: u64) -> Result<()> {
        self.update_gauge(store, ctx, names::ACTIVE_ESCROWS, &Labels::new(), Decimal::from(count))
    }

    pub fn update_active_channels<S: KvStore + ?Sized>(&self, store: &mut S, ctx: &BlockContext, count: u64) -> Result<()> {
        self.update_gauge(store, ctx, names::ACTIVE_CHANNELS, &Labels::new(), Decimal::from(count))
    }

    pub fn record_circuit_trip<S: KvStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        self.increment_counter(store, names::CIRCUIT_TRIPS, &Labels::new())?;
        Ok(())
    }

    pub fn record_rate_limit_hit<S: KvStore + ?Sized>(&self, store: &mut S, limit: &str) -> Result<()> {
        self.increment_counter(store, names::RATE_LIMIT_HITS, &Labels::from([("limit", limit)]))?;
        Ok(())
    }

    pub fn record_compliance_block<S: KvStore + ?Sized>(&self, store: &mut S, reason: &str) -> Result<()> {
        self.increment_counter(store, names::COMPLIANCE_BLOCKS, &Labels::from([("reason", reason)]))?;
        Ok(())
    }

    pub fn record_price_update<S: KvStore + ?Sized>(&self, store: &mut S, denom: &str) -> Result<()> {
        self.increment_counter(store, names::PRICE_UPDATES, &Labels::from([("denom", denom)]))?;
        Ok(())
    }

    pub fn update_stale_price_count<S: KvStore + ?Sized>(&self, store: &mut S, ctx: &BlockContext, count: u64) -> Result<()> {
        self.update_gauge(store, ctx, names::STALE_PRICE_COUNT, &Labels::new(), Decimal::from(count))
    }

    // ---- aggregate view ----

    pub fn system_metrics<S: KvStore + ?Sized>(&self, store: &S) -> Result<SystemMetrics> {
        let stats = self.block_stats(store)?;
        let transactions_total = self
            .sum_counter(store, names::TRANSACTIONS_SUCCESS)?
            .saturating_add(self.sum_counter(store, names::TRANSACTIONS_FAILED)?);

        Ok(SystemMetrics {
            last_block_height: stats.last_block_height,
            last_block_time: stats.last_block_time,
            average_block_time_ms: stats.average_block_time_ms,
            transactions_total,
            module_health: self.module_health(store)?,
            total_collateral_value: self.gauge_value(store, names::TOTAL_COLLATERAL_VALUE)?,
            total_debt_value: self.gauge_value(store, names::TOTAL_DEBT_VALUE)?,
            system_collateral_ratio: self.gauge_value(store, names::SYSTEM_COLLATERAL_RATIO)?,
            total_settlements: self.sum_counter(store, names::SETTLEMENTS_TOTAL)?,
            total_settlement_volume: self.sum_counter(store, names::SETTLEMENT_VOLUME_TOTAL)?,
            active_escrows: self.gauge_count(store, names::ACTIVE_ESCROWS)?,
            active_channels: self.gauge_count(store, names::ACTIVE_CHANNELS)?,
            prices_updated: self.sum_counter(store, names::PRICE_UPDATES)?,
            stale_price_count: self.gauge_count(store, names::STALE_PRICE_COUNT)?,
            circuit_trips: self.sum_counter(store, names::CIRCUIT_TRIPS)?,
            rate_limit_hits: self.sum_counter(store, names::RATE_LIMIT_HITS)?,
            compliance_blocks: self.sum_counter(store, names::COMPLIANCE_BLOCKS)?,
        })
    }

    /// Write unlabeled backing entries so that [`MetricStore::system_metrics`]
    /// reproduces `snapshot`. Used when a genesis file carries only the
    /// aggregate view.
    pub fn seed_from_snapshot<S: KvStore + ?Sized>(&self, store: &mut S, snapshot: &SystemMetrics) -> Result<()> {
        self.set_block_stats(store, &snapshot.block_stats())?;
        for health in snapshot.module_health.values() {
            self.set_module_health(store, health)?;
        }

        let none = Labels::new();
        let counters = [
            (names::TRANSACTIONS_SUCCESS, snapshot.transactions_total),
            (names::SETTLEMENTS_TOTAL, snapshot.total_settlements),
            (names::SETTLEMENT_VOLUME_TOTAL, snapshot.total_settlement_volume),
            (names::PRICE_UPDATES, snapshot.prices_updated),
            (names::CIRCUIT_TRIPS, snapshot.circuit_trips),
            (names::RATE_LIMIT_HITS, snapshot.rate_limit_hits),
            (names::COMPLIANCE_BLOCKS, snapshot.compliance_blocks),
        ];
        for (name, value) in counters.into_iter().filter(|(_, v)| *v > 0) {
            self.set_counter(store, &Counter { name: name.to_string(), value, labels: none.clone() })?;
        }

        let gauges = [
            (names::TOTAL_COLLATERAL_VALUE, snapshot.total_collateral_value),
            (names::TOTAL_DEBT_VALUE, snapshot.total_debt_value),
            (names::SYSTEM_COLLATERAL_RATIO, snapshot.system_collateral_ratio),
            (names::ACTIVE_ESCROWS, Decimal::from(snapshot.active_escrows)),
            (names::ACTIVE_CHANNELS, Decimal::from(snapshot.active_channels)),
            (names::STALE_PRICE_COUNT, Decimal::from(snapshot.stale_price_count)),
        ];
        for (name, value) in gauges.into_iter().filter(|(_, v)| !v.is_zero()) {
            self.set_gauge(
                store,
                &Gauge {
                    name: name.to_string(),
                    value,
                    labels: none.clone(),
                    updated_at: snapshot.last_block_time,
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::collections::HashMap;

    fn ctx(height: i64, secs: i64) -> BlockContext {
        BlockContext::at_unix(height, 1_700_000_000 + secs).unwrap()
    }

    #[test]
    fn test_counter_defaults_to_zero() {
        let store = MemoryStore::new();
        let metrics = MetricStore::default();
        let c = metrics.get_counter(&store, "missing", &Labels::new()).unwrap();
        assert_eq!(c.value, 0);
        assert_eq!(c.name, "missing");
    }

    #[test]
    fn test_label_order_resolves_same_entry() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();

        let mut first = HashMap::new();
        first.insert("module".to_string(), "bank".to_string());
        first.insert("denom".to_string(), "uusd".to_string());
        let second: Labels = [("denom", "uusd"), ("module", "bank")].into();

        metrics.increment_counter(&mut store, "ops", &Labels::from(first)).unwrap();
        metrics.increment_counter(&mut store, "ops", &second).unwrap();
        assert_eq!(metrics.get_counter(&store, "ops", &second).unwrap().value, 2);
        assert_eq!(metrics.counters(&store, "ops").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_metric_name_rejected() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        let err = metrics.increment_counter(&mut store, "bad name", &Labels::new()).unwrap_err();
        assert!(matches!(err, SentinelError::InvalidArgument(_)));
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        let labels = Labels::new().with("pool", "a");
        metrics.update_gauge(&mut store, &ctx(1, 0), "depth", &labels, Decimal::from(5)).unwrap();
        metrics.update_gauge(&mut store, &ctx(2, 6), "depth", &labels, Decimal::new(25, 1)).unwrap();
        let g = metrics.get_gauge(&store, "depth", &labels).unwrap();
        assert_eq!(g.value, Decimal::new(25, 1));
        assert_eq!(g.updated_at, Some(ctx(2, 6).time));
    }

    #[test]
    fn test_block_time_moving_average() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        metrics.update_block_metrics(&mut store, &ctx(1, 0)).unwrap();
        metrics.update_block_metrics(&mut store, &ctx(2, 5)).unwrap();
        assert_eq!(metrics.block_stats(&store).unwrap().average_block_time_ms, Decimal::from(5000));
        metrics.update_block_metrics(&mut store, &ctx(3, 20)).unwrap();
        // 5000 * 0.9 + 15000 * 0.1
        let stats = metrics.block_stats(&store).unwrap();
        assert_eq!(stats.average_block_time_ms, Decimal::from(6000));
        assert_eq!(stats.last_block_height, 3);
    }

    #[test]
    fn test_module_health_from_counts() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        for i in 0..20 {
            metrics
                .record_transaction(&mut store, "bank", i % 10 != 0, Decimal::from(4))
                .unwrap();
        }
        let health = metrics.get_module_health(&store, "bank").unwrap().unwrap();
        assert_eq!(health.transactions, 20);
        assert_eq!(health.failures, 2);
        assert_eq!(health.error_rate, Decimal::new(1, 1));
        assert_eq!(health.status, crate::monitoring::types::HealthStatus::Degraded);
        assert_eq!(metrics.system_metrics(&store).unwrap().transactions_total, 20);
    }

    #[test]
    fn test_collateral_ratio_zero_debt() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        metrics
            .update_collateral_metrics(&mut store, &ctx(1, 0), Decimal::from(1000), Decimal::ZERO)
            .unwrap();
        assert_eq!(metrics.system_metrics(&store).unwrap().system_collateral_ratio, Decimal::ZERO);
        metrics
            .update_collateral_metrics(&mut store, &ctx(1, 0), Decimal::from(1500), Decimal::from(1000))
            .unwrap();
        assert_eq!(metrics.system_metrics(&store).unwrap().system_collateral_ratio, Decimal::new(15, 1));
    }

    #[test]
    fn test_labeled_counters_aggregate() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        metrics.record_rate_limit_hit(&mut store, "per_address").unwrap();
        metrics.record_rate_limit_hit(&mut store, "global").unwrap();
        metrics.record_rate_limit_hit(&mut store, "global").unwrap();
        metrics.record_price_update(&mut store, "uatom").unwrap();
        let snapshot = metrics.system_metrics(&store).unwrap();
        assert_eq!(snapshot.rate_limit_hits, 3);
        assert_eq!(snapshot.prices_updated, 1);
    }
}
