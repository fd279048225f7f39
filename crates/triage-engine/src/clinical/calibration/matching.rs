//! Similarity between a new presentation and historical feedback.

use serde::{Deserialize, Serialize};

use crate::clinical::feedback::{ClinicalFeatures, FeedbackRecord, KeyVitals};
use crate::clinical::rulepack::normalize_topic;

/// Absolute differences under which two vitals count as similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalTolerance {
    pub hr: u16,
    pub sbp: u16,
    pub rr: u16,
    pub spo2: u8,
    pub temp: f32,
}

impl Default for VitalTolerance {
    fn default() -> Self {
        Self {
            hr: 10,
            sbp: 15,
            rr: 4,
            spo2: 3,
            temp: 0.5,
        }
    }
}

impl VitalTolerance {
    /// True when at least one vital is recorded on both sides and every
    /// shared vital is within tolerance.
    pub fn similar(&self, left: &KeyVitals, right: &KeyVitals) -> bool {
        let checks = [
            pair(left.hr, right.hr).map(|(a, b)| a.abs_diff(b) <= self.hr),
            pair(left.sbp, right.sbp).map(|(a, b)| a.abs_diff(b) <= self.sbp),
            pair(left.rr, right.rr).map(|(a, b)| a.abs_diff(b) <= self.rr),
            pair(left.spo2, right.spo2).map(|(a, b)| a.abs_diff(b) <= self.spo2),
            pair(left.temp, right.temp).map(|(a, b)| (a - b).abs() <= self.temp),
        ];

        let mut compared = false;
        for check in checks.into_iter().flatten() {
            if !check {
                return false;
            }
            compared = true;
        }
        compared
    }
}

fn pair<T>(left: Option<T>, right: Option<T>) -> Option<(T, T)> {
    Some((left?, right?))
}

/// Same age group and complaint, plus overlapping symptoms, similar vitals,
/// or a shared risk factor.
pub fn features_overlap(
    query: &ClinicalFeatures,
    candidate: &ClinicalFeatures,
    tolerance: &VitalTolerance,
) -> bool {
    if query.age_group != candidate.age_group
        || normalize_topic(&query.chief_complaint) != normalize_topic(&candidate.chief_complaint)
    {
        return false;
    }

    shares_any(&query.top_symptoms, &candidate.top_symptoms)
        || tolerance.similar(&query.key_vitals, &candidate.key_vitals)
        || shares_any(&query.risk_factors, &candidate.risk_factors)
}

fn shares_any(left: &[String], right: &[String]) -> bool {
    left.iter()
        .any(|item| right.iter().any(|other| other.eq_ignore_ascii_case(item)))
}

/// Records similar to `features`, restricted to `candidate_labels` when any
/// are given.
pub fn match_records(
    history: Vec<FeedbackRecord>,
    features: &ClinicalFeatures,
    candidate_labels: &[String],
    tolerance: &VitalTolerance,
) -> Vec<FeedbackRecord> {
    history
        .into_iter()
        .filter(|record| {
            candidate_labels.is_empty()
                || candidate_labels
                    .iter()
                    .any(|label| label.eq_ignore_ascii_case(&record.confirmed_diagnosis))
        })
        .filter(|record| features_overlap(features, &record.features, tolerance))
        .collect()
}
