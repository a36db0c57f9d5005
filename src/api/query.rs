//! Read-only queries over engine state.
//!
//! [`QueryService`] offers typed entry points; [`route_query`] decodes a JSON
//! request body for a query path and returns the JSON-encoded answer.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{
    AddressRequest, AlertsRequest, AlertsResponse, CounterResponse, GaugeResponse, MetricRequest,
    ModuleHealthRequest, ModuleHealthResponse, PrometheusResponse, SecurityAlertRequest, SecurityAlertsRequest,
    SystemMetricsRequest,
};
use crate::anomaly_detection::profile::UserBehaviorProfile;
use crate::audit::{AlertLifecycle, SecurityAlert};
use crate::core::context::BlockContext;
use crate::core::errors::{Result, SentinelError};
use crate::monitoring::{exposition, AlertEvaluator, MetricStore, SystemMetrics};
use crate::security::risk_profile::{get_risk_profile, RiskProfile};
use crate::storage::{codec, keys, KvStore};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct QueryService<'a, S: KvStore + ?Sized> {
    store: &'a S,
    metrics: &'a MetricStore,
}

impl<'a, S: KvStore + ?Sized> QueryService<'a, S> {
    pub fn new(store: &'a S, metrics: &'a MetricStore) -> Self {
        Self { store, metrics }
    }

    pub fn system_metrics(&self, _req: &SystemMetricsRequest) -> Result<SystemMetrics> {
        self.metrics.system_metrics(self.store)
    }

    pub fn counter(&self, req: &MetricRequest) -> Result<CounterResponse> {
        let c = self.metrics.get_counter(self.store, &req.name, &req.labels)?;
        Ok(CounterResponse { name: c.name, labels: c.labels, value: c.value })
    }

    pub fn gauge(&self, req: &MetricRequest) -> Result<GaugeResponse> {
        let g = self.metrics.get_gauge(self.store, &req.name, &req.labels)?;
        Ok(GaugeResponse { name: g.name, labels: g.labels, value: g.value })
    }

    /// One module, or all of them. An unknown module is `NotFound`.
    pub fn module_health(&self, req: &ModuleHealthRequest) -> Result<ModuleHealthResponse> {
        let mut modules = self.metrics.module_health(self.store)?;
        if let Some(module) = &req.module {
            let health = modules
                .remove(module)
                .ok_or_else(|| SentinelError::NotFound(format!("module {}", module)))?;
            modules.clear();
            modules.insert(module.clone(), health);
        }
        Ok(ModuleHealthResponse { modules })
    }

    /// Active alerts are evaluated against the last block without being stored
    pub fn alerts(&self, req: &AlertsRequest) -> Result<AlertsResponse> {
        let evaluator = AlertEvaluator::new();
        if !req.active {
            return Ok(AlertsResponse::Configs(evaluator.get_alert_configs(self.store)?));
        }
        let snapshot = self.metrics.system_metrics(self.store)?;
        let ctx = BlockContext::new(
            snapshot.last_block_height,
            snapshot.last_block_time.unwrap_or_default(),
        );
        Ok(AlertsResponse::Active(evaluator.check_alerts(self.store, &snapshot, &ctx)?))
    }

    pub fn prometheus_metrics(&self) -> Result<PrometheusResponse> {
        let snapshot = self.metrics.system_metrics(self.store)?;
        Ok(PrometheusResponse {
            content_type: PROMETHEUS_CONTENT_TYPE,
            body: exposition::render(&snapshot, &self.metrics.config().namespace)?,
        })
    }

    pub fn security_alert(&self, req: &SecurityAlertRequest) -> Result<SecurityAlert> {
        AlertLifecycle::new().get_alert(self.store, &req.id)
    }

    /// Alerts in creation order, narrowed by status and sender
    pub fn security_alerts(&self, req: &SecurityAlertsRequest) -> Result<Vec<SecurityAlert>> {
        let lifecycle = AlertLifecycle::new();
        let alerts: Vec<SecurityAlert> = match (req.status, &req.address) {
            (Some(status), address) => lifecycle
                .alerts_by_status(self.store, status)?
                .into_iter()
                .filter(|a| address.as_ref().map_or(true, |addr| &a.address == addr))
                .collect(),
            (None, Some(address)) => lifecycle.alerts_for_address(self.store, address)?,
            (None, None) => lifecycle.all_alerts(self.store)?,
        };
        Ok(alerts)
    }

    pub fn risk_profile(&self, req: &AddressRequest) -> Result<RiskProfile> {
        get_risk_profile(self.store, &req.address)?
            .ok_or_else(|| SentinelError::NotFound(format!("risk profile {}", req.address)))
    }

    pub fn behavior_profile(&self, req: &AddressRequest) -> Result<UserBehaviorProfile> {
        codec::load(self.store, &keys::behavior_profile(&req.address))?
            .ok_or_else(|| SentinelError::NotFound(format!("behavior profile {}", req.address)))
    }
}

fn decode_request<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T> {
    let trimmed = std::str::from_utf8(body)
        .map_err(|_| SentinelError::InvalidArgument(format!("{}: request is not UTF-8", path)))?
        .trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(SentinelError::InvalidArgument(format!("{}: empty request", path)));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| SentinelError::InvalidArgument(format!("{}: malformed request: {}", path, e)))
}

fn respond<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Dispatch a JSON query by path
pub fn route_query<S: KvStore + ?Sized>(service: &QueryService<'_, S>, path: &str, body: &[u8]) -> Result<Vec<u8>> {
    let path = path.trim_matches('/');
    debug!(path, bytes = body.len(), "query");
    match path {
        "system_metrics" => respond(&service.system_metrics(&decode_request(path, body)?)?),
        "counter" => respond(&service.counter(&decode_request(path, body)?)?),
        "gauge" => respond(&service.gauge(&decode_request(path, body)?)?),
        "module_health" => respond(&service.module_health(&decode_request(path, body)?)?),
        "alerts" => respond(&service.alerts(&decode_request(path, body)?)?),
        "prometheus_metrics" => {
            decode_request::<SystemMetricsRequest>(path, body)?;
            Ok(service.prometheus_metrics()?.body.into_bytes())
        }
        "security_alert" => respond(&service.security_alert(&decode_request(path, body)?)?),
        "security_alerts" => respond(&service.security_alerts(&decode_request(path, body)?)?),
        "risk_profile" => respond(&service.risk_profile(&decode_request(path, body)?)?),
        "behavior_profile" => respond(&service.behavior_profile(&decode_request(path, body)?)?),
        other => Err(SentinelError::InvalidArgument(format!("unknown query path '{}'", other))),
    }
}
