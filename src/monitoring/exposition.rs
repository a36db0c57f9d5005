//! Text exposition of the aggregate metrics view.
//!
//! A fresh registry is built per call from a [`SystemMetrics`] snapshot, so
//! output depends on stored state only.

use prometheus::{Gauge, GaugeVec, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::types::SystemMetrics;
use crate::core::errors::Result;

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

struct Exporter<'a> {
    registry: Registry,
    namespace: &'a str,
}

impl<'a> Exporter<'a> {
    fn opts(&self, name: &str, help: &str) -> Opts {
        Opts::new(name, help).namespace(self.namespace)
    }

    fn int_gauge(&self, name: &str, help: &str, value: i64) -> Result<()> {
        let g = IntGauge::with_opts(self.opts(name, help))?;
        g.set(value);
        self.registry.register(Box::new(g))?;
        Ok(())
    }

    fn gauge(&self, name: &str, help: &str, value: Decimal) -> Result<()> {
        let g = Gauge::with_opts(self.opts(name, help))?;
        g.set(to_f64(value));
        self.registry.register(Box::new(g))?;
        Ok(())
    }

    fn counter(&self, name: &str, help: &str, value: u64) -> Result<()> {
        let c = IntCounter::with_opts(self.opts(name, help))?;
        c.inc_by(value);
        self.registry.register(Box::new(c))?;
        Ok(())
    }
}

/// Render `metrics` in the Prometheus text format
pub fn render(metrics: &SystemMetrics, namespace: &str) -> Result<String> {
    let ex = Exporter { registry: Registry::new(), namespace };

    ex.int_gauge("block_height", "Current block height", metrics.last_block_height)?;
    ex.int_gauge(
        "last_block_time_seconds",
        "Unix time of the last block",
        metrics.last_block_time.map(|t| t.timestamp()).unwrap_or(0),
    )?;
    ex.gauge(
        "average_block_time_seconds",
        "Average block time in seconds",
        metrics.average_block_time_ms / Decimal::ONE_THOUSAND,
    )?;
    ex.counter("transactions_total", "Total transactions processed", metrics.transactions_total)?;

    ex.counter("total_settlements", "Total number of settlements", metrics.total_settlements)?;
    ex.counter("total_settlement_volume", "Total settlement volume", metrics.total_settlement_volume)?;
    ex.int_gauge("active_escrows", "Number of active escrows", clamp_i64(metrics.active_escrows))?;
    ex.int_gauge("active_channels", "Number of active payment channels", clamp_i64(metrics.active_channels))?;

    ex.gauge("total_collateral_value", "Total collateral value", metrics.total_collateral_value)?;
    ex.gauge("total_debt_value", "Total debt value", metrics.total_debt_value)?;
    ex.gauge("system_collateral_ratio", "System-wide collateral ratio", metrics.system_collateral_ratio)?;

    ex.counter("circuit_trips", "Total circuit breaker trips", metrics.circuit_trips)?;
    ex.counter("rate_limit_hits", "Total rate limit hits", metrics.rate_limit_hits)?;
    ex.counter("compliance_blocks", "Total compliance blocks", metrics.compliance_blocks)?;

    ex.counter("prices_updated", "Total price updates", metrics.prices_updated)?;
    ex.int_gauge("stale_price_count", "Number of stale prices", clamp_i64(metrics.stale_price_count))?;

    if !metrics.module_health.is_empty() {
        let error_rate = GaugeVec::new(ex.opts("module_error_rate", "Module error rate"), &["module"])?;
        let latency = GaugeVec::new(ex.opts("module_latency_ms", "Module average latency in milliseconds"), &["module"])?;
        let transactions = IntGaugeVec::new(ex.opts("module_transactions", "Module transaction count"), &["module"])?;
        let health = GaugeVec::new(
            ex.opts("module_health", "Module health (1 healthy, 0.5 degraded, 0 unhealthy)"),
            &["module"],
        )?;
        for (module, h) in &metrics.module_health {
            error_rate.with_label_values(&[module.as_str()]).set(to_f64(h.error_rate));
            latency.with_label_values(&[module.as_str()]).set(to_f64(h.latency_ms));
            transactions.with_label_values(&[module.as_str()]).set(clamp_i64(h.transactions));
            health.with_label_values(&[module.as_str()]).set(h.status.score());
        }
        ex.registry.register(Box::new(error_rate))?;
        ex.registry.register(Box::new(latency))?;
        ex.registry.register(Box::new(transactions))?;
        ex.registry.register(Box::new(health))?;
    }

    let families = ex.registry.gather();
    Ok(TextEncoder::new().encode_to_string(&families)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ModuleHealth;

    #[test]
    fn test_render_contains_help_and_type() {
        let metrics = SystemMetrics {
            last_block_height: 12,
            total_settlements: 3,
            circuit_trips: 2,
            ..Default::default()
        };
        let text = render(&metrics, "sentinel").unwrap();
        assert!(text.contains("# HELP sentinel_block_height Current block height"));
        assert!(text.contains("# TYPE sentinel_block_height gauge"));
        assert!(text.contains("sentinel_block_height 12"));
        assert!(text.contains("# TYPE sentinel_circuit_trips counter"));
        assert!(text.contains("sentinel_total_settlements 3"));
        assert!(!text.contains("module_error_rate"));
    }

    #[test]
    fn test_render_module_labels() {
        let mut metrics = SystemMetrics::default();
        let mut health = ModuleHealth::new("bank");
        health.transactions = 4;
        metrics.module_health.insert("bank".into(), health);
        let text = render(&metrics, "sentinel").unwrap();
        assert!(text.contains("sentinel_module_transactions{module=\"bank\"} 4"));
        assert!(text.contains("sentinel_module_health{module=\"bank\"} 1"));
    }

    #[test]
    fn test_render_is_stable() {
        let metrics = SystemMetrics { rate_limit_hits: 7, ..Default::default() };
        assert_eq!(render(&metrics, "x").unwrap(), render(&metrics, "x").unwrap());
    }
}
