//! Threshold alerts over the aggregate metrics view.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use super::types::SystemMetrics;
use crate::core::context::BlockContext;
use crate::core::errors::{Result, SentinelError};
use crate::storage::{codec, keys, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertCondition {
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "eq")]
    Equals,
    #[serde(rename = "ne")]
    NotEquals,
}

impl AlertCondition {
    pub fn holds(&self, value: Decimal, threshold: Decimal) -> bool {
        match self {
            AlertCondition::GreaterThan => value > threshold,
            AlertCondition::LessThan => value < threshold,
            AlertCondition::Equals => value == threshold,
            AlertCondition::NotEquals => value != threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::GreaterThan => "gt",
            AlertCondition::LessThan => "lt",
            AlertCondition::Equals => "eq",
            AlertCondition::NotEquals => "ne",
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Fields of [`SystemMetrics`] an alert can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    LastBlockHeight,
    AverageBlockTimeMs,
    TransactionsTotal,
    TotalCollateralValue,
    TotalDebtValue,
    SystemCollateralRatio,
    TotalSettlements,
    TotalSettlementVolume,
    ActiveEscrows,
    ActiveChannels,
    PricesUpdated,
    StalePriceCount,
    CircuitTrips,
    RateLimitHits,
    ComplianceBlocks,
    /// Worst error rate across all modules
    MaxModuleErrorRate,
}

impl MetricName {
    pub fn resolve(&self, m: &SystemMetrics) -> Decimal {
        match self {
            MetricName::LastBlockHeight => Decimal::from(m.last_block_height),
            MetricName::AverageBlockTimeMs => m.average_block_time_ms,
            MetricName::TransactionsTotal => Decimal::from(m.transactions_total),
            MetricName::TotalCollateralValue => m.total_collateral_value,
            MetricName::TotalDebtValue => m.total_debt_value,
            MetricName::SystemCollateralRatio => m.system_collateral_ratio,
            MetricName::TotalSettlements => Decimal::from(m.total_settlements),
            MetricName::TotalSettlementVolume => Decimal::from(m.total_settlement_volume),
            MetricName::ActiveEscrows => Decimal::from(m.active_escrows),
            MetricName::ActiveChannels => Decimal::from(m.active_channels),
            MetricName::PricesUpdated => Decimal::from(m.prices_updated),
            MetricName::StalePriceCount => Decimal::from(m.stale_price_count),
            MetricName::CircuitTrips => Decimal::from(m.circuit_trips),
            MetricName::RateLimitHits => Decimal::from(m.rate_limit_hits),
            MetricName::ComplianceBlocks => Decimal::from(m.compliance_blocks),
            MetricName::MaxModuleErrorRate => m.max_module_error_rate(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::LastBlockHeight => "last_block_height",
            MetricName::AverageBlockTimeMs => "average_block_time_ms",
            MetricName::TransactionsTotal => "transactions_total",
            MetricName::TotalCollateralValue => "total_collateral_value",
            MetricName::TotalDebtValue => "total_debt_value",
            MetricName::SystemCollateralRatio => "system_collateral_ratio",
            MetricName::TotalSettlements => "total_settlements",
            MetricName::TotalSettlementVolume => "total_settlement_volume",
            MetricName::ActiveEscrows => "active_escrows",
            MetricName::ActiveChannels => "active_channels",
            MetricName::PricesUpdated => "prices_updated",
            MetricName::StalePriceCount => "stale_price_count",
            MetricName::CircuitTrips => "circuit_trips",
            MetricName::RateLimitHits => "rate_limit_hits",
            MetricName::ComplianceBlocks => "compliance_blocks",
            MetricName::MaxModuleErrorRate => "max_module_error_rate",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Identity key
    pub name: String,
    pub metric_name: MetricName,
    pub condition: AlertCondition,
    pub threshold: Decimal,
    /// Informational; evaluation is per block
    #[serde(default)]
    pub duration_secs: u64,
    pub severity: AlertSeverity,
    pub enabled: bool,
}

impl AlertConfig {
    pub fn new(
        name: impl Into<String>,
        metric_name: MetricName,
        condition: AlertCondition,
        threshold: Decimal,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name,
            condition,
            threshold,
            duration_secs: 0,
            severity,
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SentinelError::Validation("alert config name cannot be empty".into()));
        }
        if self.name.contains('/') {
            return Err(SentinelError::Validation(format!(
                "alert config name '{}' cannot contain '/'",
                self.name
            )));
        }
        if self.threshold.is_sign_negative() {
            return Err(SentinelError::Validation(format!(
                "alert config '{}' threshold {} cannot be negative",
                self.name, self.threshold
            )));
        }
        Ok(())
    }

    pub fn defaults() -> Vec<AlertConfig> {
        vec![
            AlertConfig {
                duration_secs: 300,
                ..AlertConfig::new(
                    "high_error_rate",
                    MetricName::MaxModuleErrorRate,
                    AlertCondition::GreaterThan,
                    Decimal::new(1, 1),
                    AlertSeverity::Warning,
                )
            },
            AlertConfig {
                duration_secs: 60,
                ..AlertConfig::new(
                    "circuit_trips",
                    MetricName::CircuitTrips,
                    AlertCondition::GreaterThan,
                    Decimal::from(10),
                    AlertSeverity::Critical,
                )
            },
            AlertConfig {
                duration_secs: 60,
                ..AlertConfig::new(
                    "rate_limit_hits",
                    MetricName::RateLimitHits,
                    AlertCondition::GreaterThan,
                    Decimal::from(100),
                    AlertSeverity::Info,
                )
            },
            AlertConfig {
                duration_secs: 300,
                ..AlertConfig::new(
                    "stale_prices",
                    MetricName::StalePriceCount,
                    AlertCondition::GreaterThan,
                    Decimal::ZERO,
                    AlertSeverity::Warning,
                )
            },
        ]
    }
}

/// A triggered threshold alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `{config_name}-{height}`
    pub id: String,
    pub config_name: String,
    pub metric_name: MetricName,
    pub value: Decimal,
    pub threshold: Decimal,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Evaluates alert configs against a metrics snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct AlertEvaluator;

impl AlertEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Every enabled config whose condition holds, in config order.
    ///
    /// Repeated triggers are not deduplicated.
    pub fn evaluate(&self, configs: &[AlertConfig], metrics: &SystemMetrics, ctx: &BlockContext) -> Vec<Alert> {
        configs
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|config| {
                let value = config.metric_name.resolve(metrics);
                if !config.condition.holds(value, config.threshold) {
                    return None;
                }
                info!(
                    config = %config.name,
                    metric = %config.metric_name,
                    value = %value,
                    threshold = %config.threshold,
                    severity = %config.severity,
                    "alert triggered"
                );
                Some(Alert {
                    id: format!("{}-{}", config.name, ctx.height),
                    config_name: config.name.clone(),
                    metric_name: config.metric_name,
                    value,
                    threshold: config.threshold,
                    severity: config.severity,
                    message: format!(
                        "Alert: {} - value {} {} threshold {}",
                        config.name, value, config.condition, config.threshold
                    ),
                    triggered_at: ctx.time,
                    height: ctx.height,
                    resolved: false,
                    resolved_at: None,
                })
            })
            .collect()
    }

    /// Stored configs in ascending name order; may be empty
    pub fn get_alert_configs<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<AlertConfig>> {
        codec::scan_values(store, keys::ALERT_CONFIG.as_bytes())
    }

    pub fn set_alert_config<S: KvStore + ?Sized>(&self, store: &mut S, config: &AlertConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(config = %config.name, error = %e, "alert config rejected");
            return Err(e);
        }
        codec::save(store, &keys::alert_config(&config.name), config)
    }

    pub fn remove_alert_config<S: KvStore + ?Sized>(&self, store: &mut S, name: &str) -> Result<()> {
        let key = keys::alert_config(name);
        if !store.has(&key)? {
            return Err(SentinelError::NotFound(format!("alert config {}", name)));
        }
        store.delete(&key)
    }

    pub fn check_alerts<S: KvStore + ?Sized>(
        &self,
        store: &S,
        metrics: &SystemMetrics,
        ctx: &BlockContext,
    ) -> Result<Vec<Alert>> {
        let configs = self.get_alert_configs(store)?;
        Ok(self.evaluate(&configs, metrics, ctx))
    }

    pub fn persist_alert<S: KvStore + ?Sized>(&self, store: &mut S, alert: &Alert) -> Result<()> {
        codec::save(store, &keys::metric_alert(alert.height, &alert.config_name), alert)
    }

    /// Persisted alerts in (height, config name) order
    pub fn get_alerts<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<Alert>> {
        codec::scan_values(store, keys::METRIC_ALERT.as_bytes())
    }
}
