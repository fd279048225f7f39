//! Clinician feedback on confirmed outcomes, and read-only views over it.

pub mod aggregate;
mod import;

pub use aggregate::{
    summarize, ComplaintCoverage, DiagnosisStats, FeedbackSummary, RollupBucket, RollupPeriod,
};
pub use import::{parse_feedback_csv, FeedbackImportError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assessment::{AgeGroup, PatientAssessment};
use super::rulepack::normalize_topic;

/// Symptoms kept per feature snapshot.
const TOP_SYMPTOM_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackOutcome {
    Improved,
    Worsened,
    Diagnosed,
}

impl FeedbackOutcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "improved" => Some(Self::Improved),
            "worsened" => Some(Self::Worsened),
            "diagnosed" => Some(Self::Diagnosed),
            _ => None,
        }
    }
}

/// Vitals retained for similarity matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyVitals {
    pub hr: Option<u16>,
    pub sbp: Option<u16>,
    pub rr: Option<u16>,
    pub spo2: Option<u8>,
    pub temp: Option<f32>,
}

/// Clinical picture at the time of assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalFeatures {
    pub age_group: AgeGroup,
    pub chief_complaint: String,
    #[serde(default)]
    pub top_symptoms: Vec<String>,
    #[serde(default)]
    pub key_vitals: KeyVitals,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

impl ClinicalFeatures {
    /// Snapshot of the features used for history matching.
    pub fn from_assessment(chief_complaint: &str, assessment: &PatientAssessment) -> Self {
        let mut top_symptoms = Vec::new();
        for symptom in assessment
            .sample
            .signs_symptoms
            .iter()
            .chain(assessment.socrates.associated.iter())
        {
            let symptom = symptom.trim().to_lowercase();
            if !symptom.is_empty() && !top_symptoms.contains(&symptom) {
                top_symptoms.push(symptom);
            }
            if top_symptoms.len() == TOP_SYMPTOM_LIMIT {
                break;
            }
        }

        let vitals = &assessment.vitals;
        Self {
            age_group: assessment.age_group,
            chief_complaint: normalize_topic(chief_complaint),
            top_symptoms,
            key_vitals: KeyVitals {
                hr: vitals.hr,
                sbp: vitals.sbp,
                rr: vitals.rr,
                spo2: vitals.spo2,
                temp: vitals.temp,
            },
            risk_factors: assessment
                .sample
                .past_history
                .iter()
                .map(|item| item.trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

/// Immutable record of a confirmed outcome.
///
/// `session_id` and `submitted_by` identify the encounter; they are never
/// copied into aggregate views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub confirmed_diagnosis: String,
    pub outcome: FeedbackOutcome,
    pub features: ClinicalFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pack: Option<String>,
    /// Condition code of the prediction this outcome confirms or refutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_code: Option<String>,
}

/// Filter passed to the history collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackQuery {
    pub chief_complaint: Option<String>,
    pub age_group: Option<AgeGroup>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl FeedbackQuery {
    pub fn matches(&self, record: &FeedbackRecord) -> bool {
        let complaint_ok = self.chief_complaint.as_deref().map_or(true, |complaint| {
            normalize_topic(complaint) == normalize_topic(&record.features.chief_complaint)
        });
        let age_ok = self
            .age_group
            .map_or(true, |age_group| age_group == record.features.age_group);
        let since_ok = self.since.map_or(true, |since| record.recorded_at >= since);
        complaint_ok && age_ok && since_ok
    }
}

/// Persistence layer holding feedback history.
pub trait FeedbackRepository: Send + Sync {
    fn record(&self, record: FeedbackRecord) -> Result<FeedbackRecord, FeedbackError>;
    fn query(&self, query: &FeedbackQuery) -> Result<Vec<FeedbackRecord>, FeedbackError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("feedback history unavailable: {0}")]
    Unavailable(String),
    #[error("invalid feedback: {0}")]
    Invalid(String),
}
