use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::audit::AlertStatus;
use crate::monitoring::{Alert, AlertConfig, Labels, ModuleHealth};

/// Empty request body (`{}`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SystemMetricsRequest {}

/// Counter or gauge lookup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricRequest {
    pub name: String,
    /// Order of keys does not matter
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModuleHealthRequest {
    /// Absent for every module
    #[serde(default)]
    pub module: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsRequest {
    /// `true`: alerts that would trigger now; `false`: the stored configs
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityAlertRequest {
    pub id: String,
}

/// Security alert listing; both filters optional
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityAlertsRequest {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterResponse {
    pub name: String,
    pub labels: Labels,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeResponse {
    pub name: String,
    pub labels: Labels,
    pub value: rust_decimal::Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleHealthResponse {
    pub modules: BTreeMap<String, ModuleHealth>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AlertsResponse {
    Active(Vec<Alert>),
    Configs(Vec<AlertConfig>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrometheusResponse {
    pub content_type: &'static str,
    pub body: String,
}
