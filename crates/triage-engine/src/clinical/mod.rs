//! Clinical decision support: rule-pack resolution, rule evaluation, scoring,
//! triage, and outcome-driven confidence calibration.
//!
//! Everything here assumes a range-checked [`PatientAssessment`]; the HTTP
//! layer in [`router`] rejects impossible vitals before they arrive.

pub mod assessment;
pub mod calibration;
pub mod engine;
pub mod feedback;
pub mod router;
pub mod rulepack;
pub mod scores;
pub mod service;
pub mod triage;

#[cfg(test)]
mod tests;

pub use assessment::{AgeGroup, PatientAssessment, Vitals};
pub use calibration::{
    ActualOutcome, CalibrationError, CalibrationKey, CalibrationModifier, CalibrationService,
    CalibrationStore, InMemoryCalibrationStore,
};
pub use engine::{Recommendation, RuleEngine, RuleEngineResult};
pub use feedback::{ClinicalFeatures, FeedbackError, FeedbackRecord, FeedbackRepository};
pub use router::{clinical_router, validate_vitals};
pub use rulepack::{FsRulePackStore, RuleLoadResult, RulePack, RulePackResolver, RulePackStore};
pub use service::{
    DecisionOutcome, DecisionRequest, DecisionService, DecisionServiceError, FeedbackSubmission,
};
pub use triage::{TriageResult, TriageScorer};
