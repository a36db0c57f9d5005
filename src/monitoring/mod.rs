//! Monitoring: label-keyed metrics, aggregate view, threshold alerts and
//! Prometheus exposition.

pub mod alerts;
pub mod exposition;
pub mod labels;
pub mod metric_store;
pub mod types;

pub use alerts::{Alert, AlertCondition, AlertConfig, AlertEvaluator, AlertSeverity, MetricName};
pub use labels::Labels;
pub use metric_store::MetricStore;
pub use types::{Counter, Gauge, HealthStatus, Histogram, HistogramBucket, ModuleHealth, SystemMetrics};
