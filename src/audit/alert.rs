//! Security alert lifecycle.
//!
//! Alert ids are `sec-{height}-{seq}` where `seq` counts alerts created
//! inside the block, starting at zero. Nothing else feeds the id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::anomaly_detection::profile::{load_profile, save_profile};
use crate::core::context::BlockContext;
use crate::core::errors::{Result, SentinelError};
use crate::storage::{codec, keys, KvStore};

const ID_PREFIX: &str = "sec";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Fraud,
    Velocity,
    Pattern,
    Compliance,
    UnusualActivity,
    HighRisk,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fraud => "fraud",
            Self::Velocity => "velocity",
            Self::Pattern => "pattern",
            Self::Compliance => "compliance",
            Self::UnusualActivity => "unusual_activity",
            Self::HighRisk => "high_risk",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Investigated,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Investigated => "investigated",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }

    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Pending, Investigated) | (Pending, Resolved) | (Pending, FalsePositive)
                | (Investigated, Resolved)
                | (Investigated, FalsePositive)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: String,
    /// Triggering rule, or the scorer's threat level for scorer alerts
    pub rule_id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: u8,
    pub title: String,
    pub description: String,
    pub transaction_id: String,
    pub address: String,
    pub amount: Decimal,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub status: AlertStatus,
    pub height: i64,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SecurityAlert {
    pub fn key(&self) -> Vec<u8> {
        keys::security_alert(self.height, self.seq)
    }
}

/// Arguments of `create_alert`
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub rule_id: String,
    pub alert_type: AlertType,
    pub title: String,
    pub description: String,
    pub transaction_id: String,
    pub address: String,
    pub amount: Decimal,
    pub severity: u8,
    pub data: BTreeMap<String, String>,
}

impl NewAlert {
    pub fn new(rule_id: impl Into<String>, alert_type: AlertType, severity: u8) -> Self {
        Self {
            rule_id: rule_id.into(),
            alert_type,
            title: String::new(),
            description: String::new(),
            transaction_id: String::new(),
            address: String::new(),
            amount: Decimal::ZERO,
            severity,
            data: BTreeMap::new(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        self.title = title.into();
        self.description = description.into();
        self
    }

    pub fn for_transaction(mut self, tx_id: impl Into<String>, address: impl Into<String>, amount: Decimal) -> Self {
        self.transaction_id = tx_id.into();
        self.address = address.into();
        self.amount = amount;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.data.insert(key.into(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
struct AlertSequence {
    height: i64,
    next: u64,
}

pub fn format_alert_id(height: i64, seq: u64) -> String {
    format!("{}-{}-{}", ID_PREFIX, height, seq)
}

/// Inverse of `format_alert_id`
pub fn parse_alert_id(id: &str) -> Result<(i64, u64)> {
    let invalid = || SentinelError::InvalidArgument(format!("malformed alert id '{}'", id));
    let rest = id
        .strip_prefix(ID_PREFIX)
        .and_then(|r| r.strip_prefix('-'))
        .ok_or_else(invalid)?;
    let (height, seq) = rest.split_once('-').ok_or_else(invalid)?;
    Ok((
        height.parse().map_err(|_| invalid())?,
        seq.parse().map_err(|_| invalid())?,
    ))
}

/// Creates, reads and transitions security alerts
#[derive(Debug, Default, Clone, Copy)]
pub struct AlertLifecycle;

impl AlertLifecycle {
    pub fn new() -> Self {
        Self
    }

    fn next_seq<S: KvStore + ?Sized>(&self, store: &mut S, height: i64) -> Result<u64> {
        let key = keys::ALERT_SEQUENCE.as_bytes();
        let current: AlertSequence = codec::load(store, key)?.unwrap_or_default();
        let mut seq = if current.height == height { current.next } else { 0 };
        // Imported alerts may already occupy a slot in this block
        while store.has(&keys::security_alert(height, seq))? {
            seq += 1;
        }
        codec::save(store, key, &AlertSequence { height, next: seq + 1 })?;
        Ok(seq)
    }

    /// Persist a new pending alert and count an incident against its address
    pub fn create_alert<S: KvStore + ?Sized>(&self, store: &mut S, ctx: &BlockContext, new: NewAlert) -> Result<String> {
        if !(1..=4).contains(&new.severity) {
            return Err(SentinelError::Validation(format!(
                "alert severity {} must be between 1 and 4",
                new.severity
            )));
        }
        let seq = self.next_seq(store, ctx.height)?;
        let alert = SecurityAlert {
            id: format_alert_id(ctx.height, seq),
            rule_id: new.rule_id,
            alert_type: new.alert_type,
            severity: new.severity,
            title: new.title,
            description: new.description,
            transaction_id: new.transaction_id,
            address: new.address,
            amount: new.amount,
            data: new.data,
            status: AlertStatus::Pending,
            height: ctx.height,
            seq,
            created_at: ctx.time,
            resolved_at: None,
        };
        codec::save(store, &alert.key(), &alert)?;

        if !alert.address.is_empty() {
            let mut profile = load_profile(store, &alert.address)?;
            profile.incident_count += 1;
            save_profile(store, &profile)?;
        }

        info!(
            id = %alert.id,
            rule = %alert.rule_id,
            kind = %alert.alert_type,
            severity = alert.severity,
            address = %alert.address,
            "security alert created"
        );
        Ok(alert.id)
    }

    pub fn get_alert<S: KvStore + ?Sized>(&self, store: &S, id: &str) -> Result<SecurityAlert> {
        let (height, seq) = parse_alert_id(id)?;
        codec::load(store, &keys::security_alert(height, seq))?
            .ok_or_else(|| SentinelError::NotFound(format!("security alert {}", id)))
    }

    pub fn update_alert_status<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        id: &str,
        status: AlertStatus,
    ) -> Result<SecurityAlert> {
        let mut alert = self.get_alert(store, id)?;
        if !alert.status.can_transition_to(status) {
            warn!(id, from = %alert.status, to = %status, "alert transition rejected");
            return Err(SentinelError::InvalidTransition {
                from: alert.status.to_string(),
                to: status.to_string(),
            });
        }
        alert.status = status;
        if status.is_closed() {
            alert.resolved_at = Some(ctx.time);
        }
        codec::save(store, &alert.key(), &alert)?;
        info!(id, status = %status, "security alert status changed");
        Ok(alert)
    }

    /// Writes a previously exported alert verbatim
    pub fn import_alert<S: KvStore + ?Sized>(&self, store: &mut S, alert: &SecurityAlert) -> Result<()> {
        if alert.id != format_alert_id(alert.height, alert.seq) {
            return Err(SentinelError::Validation(format!(
                "alert id {} does not match height {} and seq {}",
                alert.id, alert.height, alert.seq
            )));
        }
        codec::save(store, &alert.key(), alert)
    }

    /// All alerts in creation order
    pub fn all_alerts<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<SecurityAlert>> {
        codec::scan_values(store, keys::SECURITY_ALERT.as_bytes())
    }

    pub fn alerts_by_status<S: KvStore + ?Sized>(&self, store: &S, status: AlertStatus) -> Result<Vec<SecurityAlert>> {
        Ok(self
            .all_alerts(store)?
            .into_iter()
            .filter(|a| a.status == status)
            .collect())
    }

    pub fn alerts_for_address<S: KvStore + ?Sized>(&self, store: &S, address: &str) -> Result<Vec<SecurityAlert>> {
        Ok(self
            .all_alerts(store)?
            .into_iter()
            .filter(|a| a.address == address)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly_detection::profile::load_profile;
    use crate::storage::MemoryStore;

    fn ctx(height: i64) -> BlockContext {
        BlockContext::at_unix(height, 1_700_000_000 + height * 5).unwrap()
    }

    fn new_alert() -> NewAlert {
        NewAlert::new("velocity-001", AlertType::Velocity, 3)
            .titled("Velocity", "too many transactions")
            .for_transaction("tx1", "addr1", Decimal::from(1000))
    }

    #[test]
    fn test_ids_from_height_and_sequence() {
        let mut store = MemoryStore::new();
        let lifecycle = AlertLifecycle::new();
        assert_eq!(lifecycle.create_alert(&mut store, &ctx(10), new_alert()).unwrap(), "sec-10-0");
        assert_eq!(lifecycle.create_alert(&mut store, &ctx(10), new_alert()).unwrap(), "sec-10-1");
        assert_eq!(lifecycle.create_alert(&mut store, &ctx(11), new_alert()).unwrap(), "sec-11-0");

        let alert = lifecycle.get_alert(&store, "sec-10-1").unwrap();
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.created_at, ctx(10).time);
        assert_eq!(lifecycle.all_alerts(&store).unwrap().len(), 3);
    }

    #[test]
    fn test_incident_counted() {
        let mut store = MemoryStore::new();
        let lifecycle = AlertLifecycle::new();
        lifecycle.create_alert(&mut store, &ctx(1), new_alert()).unwrap();
        lifecycle.create_alert(&mut store, &ctx(1), new_alert()).unwrap();
        assert_eq!(load_profile(&store, "addr1").unwrap().incident_count, 2);
    }

    #[test]
    fn test_status_machine() {
        let mut store = MemoryStore::new();
        let lifecycle = AlertLifecycle::new();
        let id = lifecycle.create_alert(&mut store, &ctx(2), new_alert()).unwrap();

        let alert = lifecycle
            .update_alert_status(&mut store, &ctx(3), &id, AlertStatus::Investigated)
            .unwrap();
        assert!(alert.resolved_at.is_none());

        let alert = lifecycle
            .update_alert_status(&mut store, &ctx(4), &id, AlertStatus::Resolved)
            .unwrap();
        assert_eq!(alert.resolved_at, Some(ctx(4).time));

        let err = lifecycle
            .update_alert_status(&mut store, &ctx(5), &id, AlertStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, SentinelError::InvalidTransition { .. }));
    }

    #[test]
    fn test_malformed_and_missing_ids() {
        let store = MemoryStore::new();
        let lifecycle = AlertLifecycle::new();
        assert!(matches!(
            lifecycle.get_alert(&store, "alert-1").unwrap_err(),
            SentinelError::InvalidArgument(_)
        ));
        assert!(matches!(
            lifecycle.get_alert(&store, "sec-1-0").unwrap_err(),
            SentinelError::NotFound(_)
        ));
        assert_eq!(parse_alert_id("sec-12-3").unwrap(), (12, 3));
    }

    #[test]
    fn test_severity_rejected() {
        let mut store = MemoryStore::new();
        let bad = NewAlert::new("r", AlertType::Fraud, 0);
        assert!(AlertLifecycle::new().create_alert(&mut store, &ctx(1), bad).is_err());
    }
}
