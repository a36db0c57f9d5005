//! Store key layout.
//!
//! Heights and sequence numbers are zero padded so lexicographic key order
//! equals numeric order.

pub const COUNTER: &str = "counter/";
pub const GAUGE: &str = "gauge/";
pub const HISTOGRAM: &str = "histogram/";
pub const MODULE_HEALTH: &str = "health/";
pub const BLOCK_STATS: &str = "block/stats";
pub const ALERT_CONFIG: &str = "alertcfg/";
pub const METRIC_ALERT: &str = "alert/";
pub const SECURITY_ALERT: &str = "secalert/";
pub const ALERT_SEQUENCE: &str = "seq/alert";
pub const SECURITY_RULE: &str = "rule/";
pub const COMPLIANCE_RULE: &str = "compliance/";
pub const RISK_PROFILE: &str = "risk/";
pub const BEHAVIOR_PROFILE: &str = "behavior/";
pub const TX_HISTORY: &str = "txhist/";

/// `{family}{name}/` prefix shared by every label set of one metric
pub fn metric_prefix(family: &str, name: &str) -> Vec<u8> {
    format!("{}{}/", family, name).into_bytes()
}

pub fn metric(family: &str, name: &str, canonical_labels: &str) -> Vec<u8> {
    format!("{}{}/{}", family, name, canonical_labels).into_bytes()
}

pub fn module_health(module: &str) -> Vec<u8> {
    format!("{}{}", MODULE_HEALTH, module).into_bytes()
}

pub fn alert_config(name: &str) -> Vec<u8> {
    format!("{}{}", ALERT_CONFIG, name).into_bytes()
}

pub fn metric_alert(height: i64, config_name: &str) -> Vec<u8> {
    format!("{}{:020}/{}", METRIC_ALERT, height, config_name).into_bytes()
}

pub fn security_alert(height: i64, seq: u64) -> Vec<u8> {
    format!("{}{:020}/{:010}", SECURITY_ALERT, height, seq).into_bytes()
}

pub fn security_rule(id: &str) -> Vec<u8> {
    format!("{}{}", SECURITY_RULE, id).into_bytes()
}

pub fn compliance_rule(id: &str) -> Vec<u8> {
    format!("{}{}", COMPLIANCE_RULE, id).into_bytes()
}

pub fn risk_profile(address: &str) -> Vec<u8> {
    format!("{}{}", RISK_PROFILE, address).into_bytes()
}

pub fn behavior_profile(address: &str) -> Vec<u8> {
    format!("{}{}", BEHAVIOR_PROFILE, address).into_bytes()
}

pub fn tx_history_prefix(address: &str) -> Vec<u8> {
    format!("{}{}/", TX_HISTORY, address).into_bytes()
}

pub fn tx_history(address: &str, height: i64, seq: u64) -> Vec<u8> {
    format!("{}{}/{:020}/{:010}", TX_HISTORY, address, height, seq).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_heights_sort_numerically() {
        assert!(security_alert(9, 0) < security_alert(10, 0));
        assert!(security_alert(10, 2) < security_alert(10, 11));
        assert!(metric_alert(99, "z") < metric_alert(100, "a"));
    }

    #[test]
    fn test_metric_key_layout() {
        assert_eq!(metric(COUNTER, "tx", "module=bank"), b"counter/tx/module=bank".to_vec());
        assert!(metric(COUNTER, "tx", "").starts_with(&metric_prefix(COUNTER, "tx")));
        assert!(!metric(COUNTER, "tx_total", "").starts_with(&metric_prefix(COUNTER, "tx")));
    }
}
