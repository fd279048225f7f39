use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use super::{ClinicalFeatures, FeedbackOutcome, FeedbackRecord, KeyVitals};
use crate::clinical::assessment::AgeGroup;
use crate::clinical::rulepack::normalize_topic;

#[derive(Debug, thiserror::Error)]
pub enum FeedbackImportError {
    #[error("invalid feedback CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: {message}")]
    Row { row: usize, message: String },
}

/// Reads a feedback history export for offline aggregation.
///
/// List columns (`top_symptoms`, `risk_factors`) are `;`-separated.
pub fn parse_feedback_csv<R: Read>(reader: R) -> Result<Vec<FeedbackRecord>, FeedbackImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();

    for (index, row) in csv_reader.deserialize::<FeedbackRow>().enumerate() {
        let row = row?;
        // Header is line 1.
        let line = index + 2;
        records.push(row.into_record(line)?);
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct FeedbackRow {
    recorded_at: String,
    session_id: String,
    confirmed_diagnosis: String,
    outcome: String,
    age_group: String,
    chief_complaint: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    top_symptoms: Option<String>,
    #[serde(default)]
    hr: Option<u16>,
    #[serde(default)]
    sbp: Option<u16>,
    #[serde(default)]
    rr: Option<u16>,
    #[serde(default)]
    spo2: Option<u8>,
    #[serde(default)]
    temp: Option<f32>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    risk_factors: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    source_pack: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    predicted_code: Option<String>,
}

impl FeedbackRow {
    fn into_record(self, line: usize) -> Result<FeedbackRecord, FeedbackImportError> {
        let row_error = |message: String| FeedbackImportError::Row { row: line, message };

        let recorded_at = parse_timestamp(&self.recorded_at)
            .ok_or_else(|| row_error(format!("unparseable recorded_at '{}'", self.recorded_at)))?;
        let outcome = FeedbackOutcome::parse(&self.outcome)
            .ok_or_else(|| row_error(format!("unknown outcome '{}'", self.outcome)))?;
        let age_group = match self.age_group.to_ascii_lowercase().as_str() {
            "adult" => AgeGroup::Adult,
            "pediatric" | "paediatric" => AgeGroup::Pediatric,
            other => return Err(row_error(format!("unknown age_group '{other}'"))),
        };

        Ok(FeedbackRecord {
            session_id: self.session_id,
            submitted_by: None,
            recorded_at,
            confirmed_diagnosis: self.confirmed_diagnosis,
            outcome,
            features: ClinicalFeatures {
                age_group,
                chief_complaint: normalize_topic(&self.chief_complaint),
                top_symptoms: split_list(self.top_symptoms.as_deref()),
                key_vitals: KeyVitals {
                    hr: self.hr,
                    sbp: self.sbp,
                    rr: self.rr,
                    spo2: self.spo2,
                    temp: self.temp,
                },
                risk_factors: split_list(self.risk_factors.as_deref()),
            },
            source_pack: self.source_pack,
            predicted_code: self.predicted_code,
        })
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(';')
            .map(|item| item.trim().to_lowercase())
            .filter(|item| !item.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
