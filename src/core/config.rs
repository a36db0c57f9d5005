use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::core::errors::{Result, SentinelError};

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prefix prepended to every exported Prometheus metric
    #[serde(default = "MetricsConfig::default_namespace")]
    pub namespace: String,

    /// Upper bounds of histogram buckets, ascending. An implicit +Inf bucket follows.
    #[serde(default = "MetricsConfig::default_histogram_buckets")]
    pub histogram_buckets: Vec<Decimal>,

    /// Smoothing factor for the average block interval
    #[serde(default = "MetricsConfig::default_block_time_alpha")]
    pub block_time_alpha: Decimal,
}

impl MetricsConfig {
    fn default_namespace() -> String {
        "sentinel".to_string()
    }
    fn default_histogram_buckets() -> Vec<Decimal> {
        [10, 100, 1_000, 10_000, 100_000, 1_000_000]
            .into_iter()
            .map(Decimal::from)
            .collect()
    }
    fn default_block_time_alpha() -> Decimal {
        Decimal::new(1, 1)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            histogram_buckets: Self::default_histogram_buckets(),
            block_time_alpha: Self::default_block_time_alpha(),
        }
    }
}

/// Weights of the five threat factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub velocity: Decimal,
    pub pattern: Decimal,
    pub amount: Decimal,
    pub geography: Decimal,
    pub history: Decimal,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            velocity: Decimal::new(25, 2),
            pattern: Decimal::new(20, 2),
            amount: Decimal::new(25, 2),
            geography: Decimal::new(15, 2),
            history: Decimal::new(15, 2),
        }
    }
}

impl FactorWeights {
    pub fn sum(&self) -> Decimal {
        self.velocity + self.pattern + self.amount + self.geography + self.history
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("velocity", self.velocity),
            ("pattern", self.pattern),
            ("amount", self.amount),
            ("geography", self.geography),
            ("history", self.history),
        ] {
            if w < Decimal::ZERO || w > Decimal::ONE {
                return Err(SentinelError::Validation(format!(
                    "weight {} = {} must be within [0, 1]",
                    name, w
                )));
            }
        }
        if self.sum() != Decimal::ONE {
            return Err(SentinelError::Validation(format!(
                "factor weights must sum to 1, got {}",
                self.sum()
            )));
        }
        Ok(())
    }
}

/// Threat scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: FactorWeights,

    /// How long per-address transaction history is kept (seconds)
    #[serde(default = "ScoringConfig::default_history_retention_secs")]
    pub history_retention_secs: i64,

    /// Upper bound on remembered transactions per address
    #[serde(default = "ScoringConfig::default_max_history_per_address")]
    pub max_history_per_address: usize,

    /// Weight of the newest observation when folding a behavior profile
    #[serde(default = "ScoringConfig::default_profile_alpha")]
    pub profile_alpha: Decimal,

    /// Interval variance (seconds squared) below which timing counts as regular
    #[serde(default = "ScoringConfig::default_low_variance_threshold")]
    pub low_variance_threshold: Decimal,

    /// Maximum locations kept in a behavior profile
    #[serde(default = "ScoringConfig::default_max_known_locations")]
    pub max_known_locations: usize,

    /// Region codes treated as resolvable. Empty means every supplied code is.
    #[serde(default)]
    pub known_regions: Vec<String>,
}

impl ScoringConfig {
    fn default_history_retention_secs() -> i64 {
        86_400
    }
    fn default_max_history_per_address() -> usize {
        1_000
    }
    fn default_profile_alpha() -> Decimal {
        Decimal::new(2, 1)
    }
    fn default_low_variance_threshold() -> Decimal {
        Decimal::from(10)
    }
    fn default_max_known_locations() -> usize {
        16
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            history_retention_secs: Self::default_history_retention_secs(),
            max_history_per_address: Self::default_max_history_per_address(),
            profile_alpha: Self::default_profile_alpha(),
            low_variance_threshold: Self::default_low_variance_threshold(),
            max_known_locations: Self::default_max_known_locations(),
            known_regions: Vec::new(),
        }
    }
}

/// Security module switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "SecurityConfig::default_enabled")]
    pub enable_fraud_detection: bool,
    #[serde(default = "SecurityConfig::default_enabled")]
    pub enable_velocity_monitoring: bool,
    #[serde(default = "SecurityConfig::default_enabled")]
    pub enable_compliance_check: bool,
    /// Threat score at which the scorer raises an alert
    #[serde(default = "SecurityConfig::default_alert_threshold")]
    pub alert_threshold: Decimal,
    /// Threat score at which the scorer recommends blocking
    #[serde(default = "SecurityConfig::default_block_threshold")]
    pub block_threshold: Decimal,
}

impl SecurityConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_alert_threshold() -> Decimal {
        Decimal::from(70)
    }
    fn default_block_threshold() -> Decimal {
        Decimal::from(90)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_fraud_detection: true,
            enable_velocity_monitoring: true,
            enable_compliance_check: true,
            alert_threshold: Self::default_alert_threshold(),
            block_threshold: Self::default_block_threshold(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl EngineConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => toml::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `SENTINEL_*` environment variables onto the loaded values
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(ns) = std::env::var("SENTINEL_METRICS_NAMESPACE") {
            self.metrics.namespace = ns;
        }
        if let Ok(v) = std::env::var("SENTINEL_HISTORY_RETENTION_SECS") {
            self.scoring.history_retention_secs = v.parse()?;
        }
        if let Ok(v) = std::env::var("SENTINEL_PROFILE_ALPHA") {
            self.scoring.profile_alpha = Decimal::from_str(&v)?;
        }
        if let Ok(v) = std::env::var("SENTINEL_KNOWN_REGIONS") {
            self.scoring.known_regions = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("SENTINEL_ENABLE_FRAUD_DETECTION") {
            self.security.enable_fraud_detection = v.parse()?;
        }
        if let Ok(v) = std::env::var("SENTINEL_ENABLE_VELOCITY_MONITORING") {
            self.security.enable_velocity_monitoring = v.parse()?;
        }
        if let Ok(v) = std::env::var("SENTINEL_ENABLE_COMPLIANCE_CHECK") {
            self.security.enable_compliance_check = v.parse()?;
        }
        self.validate()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.namespace.trim().is_empty() {
            return Err(SentinelError::Configuration("metrics namespace cannot be empty".into()));
        }
        if self.metrics.histogram_buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SentinelError::Configuration(
                "histogram buckets must be strictly ascending".into(),
            ));
        }
        let alpha = self.metrics.block_time_alpha;
        if alpha <= Decimal::ZERO || alpha > Decimal::ONE {
            return Err(SentinelError::Configuration(format!(
                "block_time_alpha {} must be within (0, 1]",
                alpha
            )));
        }
        self.scoring
            .weights
            .validate()
            .map_err(|e| SentinelError::Configuration(e.to_string()))?;
        if self.scoring.history_retention_secs <= 0 {
            return Err(SentinelError::Configuration(
                "history_retention_secs must be positive".into(),
            ));
        }
        if self.scoring.max_history_per_address == 0 {
            return Err(SentinelError::Configuration(
                "max_history_per_address must be positive".into(),
            ));
        }
        let alpha = self.scoring.profile_alpha;
        if alpha <= Decimal::ZERO || alpha > Decimal::ONE {
            return Err(SentinelError::Configuration(format!(
                "profile_alpha {} must be within (0, 1]",
                alpha
            )));
        }
        // Medium band ends at 40
        let band = Decimal::from(40)..=Decimal::ONE_HUNDRED;
        for (name, value) in [
            ("alert_threshold", self.security.alert_threshold),
            ("block_threshold", self.security.block_threshold),
        ] {
            if !band.contains(&value) {
                return Err(SentinelError::Configuration(format!(
                    "{} {} must be within [40, 100]",
                    name, value
                )));
            }
        }
        if self.security.alert_threshold > self.security.block_threshold {
            return Err(SentinelError::Configuration(
                "alert_threshold cannot exceed block_threshold".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.weights.sum(), Decimal::ONE);
        assert_eq!(config.security.alert_threshold, Decimal::from(70));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut weights = FactorWeights::default();
        weights.history = Decimal::new(20, 2);
        let err = weights.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1"));

        let mut weights = FactorWeights::default();
        weights.velocity = Decimal::new(-5, 2);
        weights.pattern = Decimal::new(50, 2);
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [security]
            enable_fraud_detection = false
            "#,
        )
        .unwrap();
        assert!(!config.security.enable_fraud_detection);
        assert!(config.security.enable_velocity_monitoring);
        assert_eq!(config.metrics.namespace, "sentinel");
        assert_eq!(config.scoring.history_retention_secs, 86_400);
    }

    #[test]
    fn test_unsorted_buckets_rejected() {
        let mut config = EngineConfig::default();
        config.metrics.histogram_buckets = vec![Decimal::from(10), Decimal::from(5)];
        assert!(matches!(config.validate(), Err(SentinelError::Configuration(_))));
    }
}
