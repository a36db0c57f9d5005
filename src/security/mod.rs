// src/security/mod.rs
//! Rule-based security checks
//!
//! Security rules (velocity, pattern, fraud, compliance), jurisdiction
//! compliance thresholds and the per-address aggregated risk profile.

pub mod compliance;
pub mod risk_profile;
pub mod rules;

pub use compliance::{check_compliance, ComplianceCheck, ComplianceRule, ComplianceType, EnforcementLevel};
pub use risk_profile::{RiskObservation, RiskProfile};
pub use rules::{RuleActions, RuleConditions, RuleEngine, RuleHit, RuleInput, RuleType, SecurityRule};
