use serde::{Deserialize, Serialize};

/// Structured bedside assessment supplied by the caller; never persisted here.
///
/// Numeric vitals are assumed to be range-checked upstream. Missing vitals are
/// modelled as `None` and contribute nothing to scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientAssessment {
    #[serde(default)]
    pub abcde: Abcde,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub sample: Sample,
    #[serde(default)]
    pub socrates: Socrates,
    #[serde(default)]
    pub age_group: AgeGroup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    #[default]
    Adult,
    Pediatric,
}

impl AgeGroup {
    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::Adult => "adult",
            AgeGroup::Pediatric => "pediatric",
        }
    }
}

/// Primary survey findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Abcde {
    pub airway: Airway,
    pub breathing: Breathing,
    pub circulation: Circulation,
    pub disability: Disability,
    pub exposure: Exposure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Airway {
    pub obstructed: bool,
    pub stridor: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Breathing {
    pub respiratory_distress: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Circulation {
    pub major_bleeding: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Disability {
    pub avpu: Option<Avpu>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Exposure {
    pub notes: Option<String>,
}

/// Alert / Voice / Pain / Unresponsive responsiveness scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Avpu {
    Alert,
    Voice,
    Pain,
    Unresponsive,
}

impl Avpu {
    /// Approximates AVPU from a Glasgow Coma Scale total when it was not recorded directly.
    pub fn from_gcs(gcs: u8) -> Self {
        match gcs {
            15.. => Avpu::Alert,
            13..=14 => Avpu::Voice,
            9..=12 => Avpu::Pain,
            _ => Avpu::Unresponsive,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    /// Heart rate, beats per minute.
    pub hr: Option<u16>,
    /// Respiratory rate, breaths per minute.
    pub rr: Option<u16>,
    /// Systolic blood pressure, mmHg.
    pub sbp: Option<u16>,
    /// Diastolic blood pressure, mmHg.
    pub dbp: Option<u16>,
    /// Peripheral oxygen saturation, percent.
    pub spo2: Option<u8>,
    /// Core temperature, degrees Celsius.
    pub temp: Option<f32>,
    /// Glasgow Coma Scale total, 3-15.
    pub gcs: Option<u8>,
}

/// Signs, Allergies, Medications, Past history, Last meal, Events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sample {
    pub signs_symptoms: Vec<String>,
    pub allergies: Vec<String>,
    pub medications: Vec<String>,
    pub past_history: Vec<String>,
    pub last_meal: Option<String>,
    pub events: Option<String>,
}

/// Pain characterisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Socrates {
    pub site: Option<String>,
    pub onset: Option<String>,
    pub character: Option<String>,
    pub radiation: Option<String>,
    pub associated: Vec<String>,
    pub time_course: Option<String>,
    pub exacerbating: Option<String>,
    /// Self-reported severity, 0-10.
    pub severity: Option<u8>,
}

impl Socrates {
    /// Case-insensitive check against the recorded pain site.
    pub fn site_mentions(&self, needle: &str) -> bool {
        self.site
            .as_deref()
            .map(|site| site.to_ascii_lowercase().contains(needle))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_sparse_payloads() {
        let payload = r#"{
            "vitals": { "hr": 118, "spo2": 93 },
            "socrates": { "site": "Central chest", "severity": 7 },
            "ageGroup": "pediatric"
        }"#;

        let assessment: PatientAssessment =
            serde_json::from_str(payload).expect("assessment parses");

        assert_eq!(assessment.vitals.hr, Some(118));
        assert_eq!(assessment.vitals.sbp, None);
        assert_eq!(assessment.age_group, AgeGroup::Pediatric);
        assert!(assessment.socrates.site_mentions("chest"));
        assert!(!assessment.abcde.airway.obstructed);
    }

    #[test]
    fn gcs_maps_onto_avpu_bands() {
        assert_eq!(Avpu::from_gcs(15), Avpu::Alert);
        assert_eq!(Avpu::from_gcs(13), Avpu::Voice);
        assert_eq!(Avpu::from_gcs(9), Avpu::Pain);
        assert_eq!(Avpu::from_gcs(8), Avpu::Unresponsive);
    }
}
