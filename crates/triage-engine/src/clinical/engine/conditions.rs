use crate::clinical::assessment::PatientAssessment;

/// Cut-offs for the vital-sign predicates.
///
/// Defaults are the heuristic values the rule packs were authored against and
/// are pending clinical review.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionThresholds {
    /// Systolic BP strictly below this is hypotension.
    pub hypotension_sbp: u16,
    /// Systolic BP at or above this is severe hypertension.
    pub hypertension_sbp: u16,
    /// Heart rate strictly above this is tachycardia.
    pub tachycardia_hr: u16,
    /// Heart rate strictly below this is bradycardia.
    pub bradycardia_hr: u16,
    /// Respiratory rate strictly above this is tachypnea.
    pub tachypnea_rr: u16,
    /// SpO2 strictly below this is hypoxia.
    pub hypoxia_spo2: u8,
    /// Temperature strictly above this is fever.
    pub fever_temp: f32,
    /// GCS strictly below this is altered consciousness.
    pub altered_gcs: u8,
}

impl Default for ConditionThresholds {
    fn default() -> Self {
        Self {
            hypotension_sbp: 90,
            hypertension_sbp: 180,
            tachycardia_hr: 100,
            bradycardia_hr: 50,
            tachypnea_rr: 20,
            hypoxia_spo2: 95,
            fever_temp: 38.0,
            altered_gcs: 15,
        }
    }
}

/// Closed set of predicates a condition string can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    ChestPain,
    Headache,
    AbdominalPain,
    Hypotension,
    Hypertension,
    Tachycardia,
    Bradycardia,
    Tachypnea,
    Hypoxia,
    Fever,
    AlteredConsciousness,
    Dyspnea,
    Bleeding,
}

/// Keyword table, checked against the lower-cased condition text.
const KEYWORDS: &[(&str, ConditionKind)] = &[
    ("chest pain", ConditionKind::ChestPain),
    ("headache", ConditionKind::Headache),
    ("abdominal pain", ConditionKind::AbdominalPain),
    ("hypotension", ConditionKind::Hypotension),
    ("hypertension", ConditionKind::Hypertension),
    ("tachycardia", ConditionKind::Tachycardia),
    ("bradycardia", ConditionKind::Bradycardia),
    ("tachypnea", ConditionKind::Tachypnea),
    ("hypoxia", ConditionKind::Hypoxia),
    ("fever", ConditionKind::Fever),
    ("altered consciousness", ConditionKind::AlteredConsciousness),
    ("altered mental status", ConditionKind::AlteredConsciousness),
    ("shortness of breath", ConditionKind::Dyspnea),
    ("dyspnea", ConditionKind::Dyspnea),
    ("bleeding", ConditionKind::Bleeding),
    ("hemorrhage", ConditionKind::Bleeding),
];

/// A rule condition parsed into the predicates it mentions.
///
/// Text that names no known predicate parses to an empty set and never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    text: String,
    kinds: Vec<ConditionKind>,
}

impl Condition {
    pub fn parse(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let mut kinds = Vec::new();
        for (keyword, kind) in KEYWORDS {
            if lowered.contains(keyword) && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        Self {
            text: text.to_string(),
            kinds,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kinds(&self) -> &[ConditionKind] {
        &self.kinds
    }

    pub fn is_recognized(&self) -> bool {
        !self.kinds.is_empty()
    }

    /// True when any mentioned predicate holds for the assessment.
    pub fn matches(&self, assessment: &PatientAssessment, thresholds: &ConditionThresholds) -> bool {
        self.kinds
            .iter()
            .any(|kind| kind.holds(assessment, thresholds))
    }
}

impl ConditionKind {
    pub fn holds(&self, assessment: &PatientAssessment, thresholds: &ConditionThresholds) -> bool {
        let vitals = &assessment.vitals;
        match self {
            ConditionKind::ChestPain => assessment.socrates.site_mentions("chest"),
            ConditionKind::Headache => assessment.socrates.site_mentions("head"),
            ConditionKind::AbdominalPain => assessment.socrates.site_mentions("abdom"),
            ConditionKind::Hypotension => vitals.sbp.is_some_and(|sbp| sbp < thresholds.hypotension_sbp),
            ConditionKind::Hypertension => {
                vitals.sbp.is_some_and(|sbp| sbp >= thresholds.hypertension_sbp)
            }
            ConditionKind::Tachycardia => vitals.hr.is_some_and(|hr| hr > thresholds.tachycardia_hr),
            ConditionKind::Bradycardia => vitals.hr.is_some_and(|hr| hr < thresholds.bradycardia_hr),
            ConditionKind::Tachypnea => vitals.rr.is_some_and(|rr| rr > thresholds.tachypnea_rr),
            ConditionKind::Hypoxia => vitals.spo2.is_some_and(|spo2| spo2 < thresholds.hypoxia_spo2),
            ConditionKind::Fever => vitals.temp.is_some_and(|temp| temp > thresholds.fever_temp),
            ConditionKind::AlteredConsciousness => {
                vitals.gcs.is_some_and(|gcs| gcs < thresholds.altered_gcs)
            }
            ConditionKind::Dyspnea => {
                assessment.abcde.breathing.respiratory_distress
                    || vitals.rr.is_some_and(|rr| rr > thresholds.tachypnea_rr)
            }
            ConditionKind::Bleeding => assessment.abcde.circulation.major_bleeding,
        }
    }
}
