//! Genesis snapshot import and export.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use crate::anomaly_detection::profile::{all_profiles, save_profile};
use crate::anomaly_detection::{TransactionHistory, TxRecord, UserBehaviorProfile};
use crate::audit::alert::parse_alert_id;
use crate::audit::{AlertLifecycle, SecurityAlert};
use crate::core::errors::{Result, SentinelError};
use crate::monitoring::{Alert, AlertConfig, AlertEvaluator, Counter, Gauge, Histogram, MetricStore, SystemMetrics};
use crate::security::compliance::{all_compliance_rules, ComplianceRule};
use crate::security::risk_profile::{all_risk_profiles, save_risk_profile, RiskProfile};
use crate::security::SecurityRule;
use crate::storage::{codec, keys, KvStore};

/// One entry of an address's recent transaction window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressTransaction {
    pub address: String,
    pub record: TxRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisState {
    pub system_metrics: SystemMetrics,
    pub alert_configs: Vec<AlertConfig>,
    pub alerts: Vec<Alert>,
    /// Backing metric entries; when empty, `system_metrics` seeds the store
    #[serde(default)]
    pub counters: Vec<Counter>,
    #[serde(default)]
    pub gauges: Vec<Gauge>,
    #[serde(default)]
    pub histograms: Vec<Histogram>,
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
    #[serde(default)]
    pub compliance_rules: Vec<ComplianceRule>,
    #[serde(default)]
    pub security_alerts: Vec<SecurityAlert>,
    #[serde(default)]
    pub risk_profiles: Vec<RiskProfile>,
    #[serde(default)]
    pub behavior_profiles: Vec<UserBehaviorProfile>,
    #[serde(default)]
    pub recent_transactions: Vec<AddressTransaction>,
}

impl Default for GenesisState {
    /// Default alert configs and security rules, no metrics
    fn default() -> Self {
        Self {
            system_metrics: SystemMetrics::default(),
            alert_configs: AlertConfig::defaults(),
            alerts: Vec::new(),
            counters: Vec::new(),
            gauges: Vec::new(),
            histograms: Vec::new(),
            security_rules: SecurityRule::defaults(),
            compliance_rules: Vec::new(),
            security_alerts: Vec::new(),
            risk_profiles: Vec::new(),
            behavior_profiles: Vec::new(),
            recent_transactions: Vec::new(),
        }
    }
}

fn ensure_unique<I>(what: &str, ids: I) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id.clone()) {
            return Err(SentinelError::Validation(format!("duplicate {} '{}' in genesis", what, id)));
        }
    }
    Ok(())
}

impl GenesisState {
    pub fn validate(&self) -> Result<()> {
        ensure_unique("alert config", self.alert_configs.iter().map(|c| c.name.clone()))?;
        ensure_unique("alert", self.alerts.iter().map(|a| format!("{}/{}", a.height, a.config_name)))?;
        ensure_unique("counter", self.counters.iter().map(|c| format!("{}/{}", c.name, c.labels.canonical())))?;
        ensure_unique("gauge", self.gauges.iter().map(|g| format!("{}/{}", g.name, g.labels.canonical())))?;
        ensure_unique(
            "histogram",
            self.histograms.iter().map(|h| format!("{}/{}", h.name, h.labels.canonical())),
        )?;
        ensure_unique("security rule", self.security_rules.iter().map(|r| r.id.clone()))?;
        ensure_unique("compliance rule", self.compliance_rules.iter().map(|r| r.id.clone()))?;
        ensure_unique("security alert", self.security_alerts.iter().map(|a| a.id.clone()))?;
        ensure_unique("risk profile", self.risk_profiles.iter().map(|p| p.address.clone()))?;
        ensure_unique("behavior profile", self.behavior_profiles.iter().map(|p| p.address.clone()))?;
        ensure_unique(
            "recent transaction",
            self.recent_transactions
                .iter()
                .map(|t| format!("{}/{}/{}", t.address, t.record.height, t.record.seq)),
        )?;

        for config in &self.alert_configs {
            config.validate()?;
        }
        for rule in &self.security_rules {
            rule.validate()?;
        }
        for rule in &self.compliance_rules {
            rule.validate()?;
        }
        for alert in &self.security_alerts {
            parse_alert_id(&alert.id).map_err(|e| SentinelError::Validation(e.to_string()))?;
        }
        for profile in &self.risk_profiles {
            profile.validate()?;
        }
        Ok(())
    }

    /// Write the snapshot into `store` and verify that the metric entries
    /// reproduce `system_metrics`.
    pub fn import<S: KvStore + ?Sized>(&self, store: &mut S, metrics: &MetricStore) -> Result<()> {
        self.validate()?;

        if self.counters.is_empty() && self.gauges.is_empty() && self.histograms.is_empty() {
            metrics.seed_from_snapshot(store, &self.system_metrics)?;
        } else {
            metrics.set_block_stats(store, &self.system_metrics.block_stats())?;
            for health in self.system_metrics.module_health.values() {
                metrics.set_module_health(store, health)?;
            }
            for counter in &self.counters {
                metrics.set_counter(store, counter)?;
            }
            for gauge in &self.gauges {
                metrics.set_gauge(store, gauge)?;
            }
            for histogram in &self.histograms {
                metrics.set_histogram(store, histogram)?;
            }
        }
        let restored = metrics.system_metrics(store)?;
        if restored != self.system_metrics {
            return Err(SentinelError::Validation(
                "genesis metric entries do not match system_metrics".into(),
            ));
        }

        let evaluator = AlertEvaluator::new();
        for config in &self.alert_configs {
            evaluator.set_alert_config(store, config)?;
        }
        for alert in &self.alerts {
            evaluator.persist_alert(store, alert)?;
        }

        for rule in &self.security_rules {
            codec::save(store, &keys::security_rule(&rule.id), rule)?;
        }
        for rule in &self.compliance_rules {
            codec::save(store, &keys::compliance_rule(&rule.id), rule)?;
        }
        let lifecycle = AlertLifecycle::new();
        for alert in &self.security_alerts {
            lifecycle.import_alert(store, alert)?;
        }
        for profile in &self.risk_profiles {
            save_risk_profile(store, profile)?;
        }
        for profile in &self.behavior_profiles {
            save_profile(store, profile)?;
        }
        for entry in &self.recent_transactions {
            let r = &entry.record;
            codec::save(store, &keys::tx_history(&entry.address, r.height, r.seq), r)?;
        }

        info!(
            alert_configs = self.alert_configs.len(),
            alerts = self.alerts.len(),
            security_rules = self.security_rules.len(),
            security_alerts = self.security_alerts.len(),
            profiles = self.behavior_profiles.len(),
            "genesis imported"
        );
        Ok(())
    }

    pub fn export<S: KvStore + ?Sized>(store: &S, metrics: &MetricStore) -> Result<Self> {
        let evaluator = AlertEvaluator::new();
        // Retention and cap only matter on append
        let history = TransactionHistory::new(1, 1);
        Ok(Self {
            system_metrics: metrics.system_metrics(store)?,
            alert_configs: evaluator.get_alert_configs(store)?,
            alerts: evaluator.get_alerts(store)?,
            counters: metrics.all_counters(store)?,
            gauges: metrics.all_gauges(store)?,
            histograms: metrics.all_histograms(store)?,
            security_rules: codec::scan_values(store, keys::SECURITY_RULE.as_bytes())?,
            compliance_rules: all_compliance_rules(store)?,
            security_alerts: AlertLifecycle::new().all_alerts(store)?,
            risk_profiles: all_risk_profiles(store)?,
            behavior_profiles: all_profiles(store)?,
            recent_transactions: history
                .all(store)?
                .into_iter()
                .map(|(address, record)| AddressTransaction { address, record })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn test_default_genesis_round_trip() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        let genesis = GenesisState::default();
        genesis.import(&mut store, &metrics).unwrap();
        let exported = GenesisState::export(&store, &metrics).unwrap();
        assert_eq!(exported.alert_configs, genesis.alert_configs);
        assert_eq!(exported.system_metrics, genesis.system_metrics);
        let ids: Vec<&str> = exported.security_rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fraud-001", "velocity-001"]);
    }

    #[test]
    fn test_aggregate_only_snapshot_seeds_store() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        let genesis = GenesisState {
            system_metrics: SystemMetrics {
                total_settlements: 3,
                total_settlement_volume: 450_000,
                system_collateral_ratio: Decimal::new(15, 1),
                ..Default::default()
            },
            ..GenesisState::default()
        };
        genesis.import(&mut store, &metrics).unwrap();
        assert_eq!(metrics.system_metrics(&store).unwrap(), genesis.system_metrics);
    }

    #[test]
    fn test_mismatched_entries_rejected() {
        let mut store = MemoryStore::new();
        let metrics = MetricStore::default();
        let genesis = GenesisState {
            system_metrics: SystemMetrics { circuit_trips: 2, ..Default::default() },
            counters: vec![Counter {
                name: "circuit_trips".into(),
                value: 5,
                labels: Default::default(),
            }],
            ..GenesisState::default()
        };
        assert!(matches!(
            genesis.import(&mut store, &metrics),
            Err(SentinelError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut genesis = GenesisState::default();
        genesis.security_rules.push(genesis.security_rules[0].clone());
        assert!(genesis.validate().is_err());
    }
}
