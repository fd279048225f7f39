//! Deterministic triage disposition from the primary survey, vitals, and rule output.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::assessment::PatientAssessment;
use super::engine::{ConditionThresholds, Recommendation};
use super::rulepack::TriageColor;
use super::scores::{calc_mews, map_from_vitals};

/// SpO2 strictly below this is a critical flag.
pub const CRITICAL_SPO2: u8 = 90;
/// Systolic BP strictly below this is a critical flag.
pub const CRITICAL_SBP: u16 = 90;
/// GCS strictly below this is a critical flag.
pub const CRITICAL_GCS: u8 = 13;
/// Self-reported pain at or above this is flagged.
pub const SEVERE_PAIN: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriagePriority {
    I,
    II,
    III,
    IV,
}

impl From<TriageColor> for TriagePriority {
    fn from(color: TriageColor) -> Self {
        match color {
            TriageColor::Red => TriagePriority::I,
            TriageColor::Orange => TriagePriority::II,
            TriageColor::Yellow => TriagePriority::III,
            TriageColor::Green => TriagePriority::IV,
        }
    }
}

/// Findings that force the most urgent disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFlag {
    AirwayCompromise,
    SevereHypoxia,
    Shock,
    ReducedConsciousness,
    MajorBleeding,
}

impl fmt::Display for SafetyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SafetyFlag::AirwayCompromise => "airway obstruction or stridor",
            SafetyFlag::SevereHypoxia => "SpO2 below 90%",
            SafetyFlag::Shock => "systolic BP below 90 mmHg",
            SafetyFlag::ReducedConsciousness => "GCS below 13",
            SafetyFlag::MajorBleeding => "major bleeding",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResult {
    pub priority: TriagePriority,
    pub color: TriageColor,
    pub reasons: Vec<String>,
    pub map: Option<u16>,
    pub mews: u8,
    pub recommended_action: String,
    pub critical_flags: Vec<SafetyFlag>,
}

/// Combines safety flags, MEWS, flagged vitals, and matched rules into a disposition.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriageScorer {
    thresholds: ConditionThresholds,
}

impl TriageScorer {
    pub fn new(thresholds: ConditionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn score(&self, assessment: &PatientAssessment) -> TriageResult {
        self.score_with_recommendations(assessment, &[])
    }

    /// As [`score`](Self::score), with the most severe matched recommendation
    /// acting as a floor on the colour.
    pub fn score_with_recommendations(
        &self,
        assessment: &PatientAssessment,
        recommendations: &[Recommendation],
    ) -> TriageResult {
        let map = map_from_vitals(&assessment.vitals);
        let mews = calc_mews(&assessment.vitals, assessment.abcde.disability.avpu);
        let critical_flags = safety_flags(assessment);
        let mut reasons = Vec::new();

        let color = if critical_flags.is_empty() {
            let mut color = mews_band(mews);
            reasons.push(format!("MEWS {mews} ({})", color.label()));

            for warning in self.vital_warnings(assessment) {
                let escalated = color.escalate().min(TriageColor::Orange);
                reasons.push(warning);
                color = escalated;
            }

            if let Some(floor) = recommendations
                .iter()
                .max_by(|left, right| left.triage.cmp(&right.triage))
            {
                if floor.triage > color {
                    reasons.push(format!(
                        "rule {} recommends {}",
                        floor.rule_id,
                        floor.triage.label()
                    ));
                    color = floor.triage;
                }
            }
            color
        } else {
            reasons.extend(critical_flags.iter().map(|flag| format!("critical: {flag}")));
            TriageColor::Red
        };

        TriageResult {
            priority: color.into(),
            color,
            reasons,
            map,
            mews,
            recommended_action: recommended_action(color).to_string(),
            critical_flags,
        }
    }

    /// Non-critical abnormal findings, each worth one step of escalation.
    fn vital_warnings(&self, assessment: &PatientAssessment) -> Vec<String> {
        let vitals = &assessment.vitals;
        let limits = &self.thresholds;
        let mut warnings = Vec::new();

        if let Some(hr) = vitals.hr {
            if hr > limits.tachycardia_hr {
                warnings.push(format!("tachycardia (HR {hr})"));
            } else if hr < limits.bradycardia_hr {
                warnings.push(format!("bradycardia (HR {hr})"));
            }
        }
        if let Some(rr) = vitals.rr {
            if rr > limits.tachypnea_rr {
                warnings.push(format!("tachypnea (RR {rr})"));
            }
        }
        if let Some(spo2) = vitals.spo2 {
            if spo2 < limits.hypoxia_spo2 {
                warnings.push(format!("hypoxia (SpO2 {spo2}%)"));
            }
        }
        if let Some(temp) = vitals.temp {
            if temp > limits.fever_temp {
                warnings.push(format!("fever ({temp:.1} °C)"));
            }
        }
        if let Some(sbp) = vitals.sbp {
            if sbp >= limits.hypertension_sbp {
                warnings.push(format!("severe hypertension (SBP {sbp})"));
            }
        }
        if assessment.abcde.breathing.respiratory_distress {
            warnings.push("respiratory distress".to_string());
        }
        if let Some(severity) = assessment.socrates.severity {
            if severity >= SEVERE_PAIN {
                warnings.push(format!("severe pain ({severity}/10)"));
            }
        }

        warnings
    }
}

/// Critical findings in fixed order.
pub fn safety_flags(assessment: &PatientAssessment) -> Vec<SafetyFlag> {
    let abcde = &assessment.abcde;
    let vitals = &assessment.vitals;
    let mut flags = Vec::new();

    if abcde.airway.obstructed || abcde.airway.stridor {
        flags.push(SafetyFlag::AirwayCompromise);
    }
    if vitals.spo2.is_some_and(|spo2| spo2 < CRITICAL_SPO2) {
        flags.push(SafetyFlag::SevereHypoxia);
    }
    if vitals.sbp.is_some_and(|sbp| sbp < CRITICAL_SBP) {
        flags.push(SafetyFlag::Shock);
    }
    if vitals.gcs.is_some_and(|gcs| gcs < CRITICAL_GCS) {
        flags.push(SafetyFlag::ReducedConsciousness);
    }
    if abcde.circulation.major_bleeding {
        flags.push(SafetyFlag::MajorBleeding);
    }

    flags
}

fn mews_band(mews: u8) -> TriageColor {
    match mews {
        0..=2 => TriageColor::Green,
        3..=4 => TriageColor::Yellow,
        _ => TriageColor::Orange,
    }
}

pub fn recommended_action(color: TriageColor) -> &'static str {
    match color {
        TriageColor::Red => "Immediate resuscitation: move to resus bay and call the emergency team",
        TriageColor::Orange => "Very urgent: senior clinician review within 10 minutes",
        TriageColor::Yellow => "Urgent: clinician assessment within 60 minutes",
        TriageColor::Green => "Standard: routine assessment; reassess if condition changes",
    }
}
