//! Security alert audit trail

pub mod alert;

pub use alert::{AlertLifecycle, AlertStatus, AlertType, NewAlert, SecurityAlert};
