use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use triage_engine::clinical::calibration::InMemoryCalibrationStore;
use triage_engine::clinical::feedback::{
    parse_feedback_csv, FeedbackError, FeedbackQuery, FeedbackRecord, FeedbackRepository,
};
use triage_engine::clinical::{DecisionService, FsRulePackStore};
use triage_engine::error::AppError;

pub(crate) type ApiDecisionService =
    DecisionService<FsRulePackStore, InMemoryFeedbackRepository, InMemoryCalibrationStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local feedback history, newest last.
#[derive(Default, Clone)]
pub(crate) struct InMemoryFeedbackRepository {
    records: Arc<Mutex<Vec<FeedbackRecord>>>,
}

impl InMemoryFeedbackRepository {
    pub(crate) fn with_records(records: Vec<FeedbackRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().expect("feedback mutex poisoned").len()
    }
}

impl FeedbackRepository for InMemoryFeedbackRepository {
    fn record(&self, record: FeedbackRecord) -> Result<FeedbackRecord, FeedbackError> {
        let mut guard = self.records.lock().expect("feedback mutex poisoned");
        guard.push(record.clone());
        Ok(record)
    }

    fn query(&self, query: &FeedbackQuery) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let guard = self.records.lock().expect("feedback mutex poisoned");
        let matching = guard.iter().rev().filter(|record| query.matches(record)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

/// Loads a feedback export. Any malformed row rejects the whole file.
pub(crate) fn read_feedback_csv(path: &Path) -> Result<Vec<FeedbackRecord>, AppError> {
    let file = File::open(path)?;
    parse_feedback_csv(BufReader::new(file))
        .map_err(|err| AppError::Input(format!("{}: {err}", path.display())))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use triage_engine::clinical::assessment::AgeGroup;
    use triage_engine::clinical::feedback::{ClinicalFeatures, FeedbackOutcome};

    fn record(session: &str, complaint: &str, day: u32) -> FeedbackRecord {
        FeedbackRecord {
            session_id: session.to_string(),
            submitted_by: None,
            recorded_at: Utc
                .with_ymd_and_hms(2024, 5, day, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
            confirmed_diagnosis: "R50.9".to_string(),
            outcome: FeedbackOutcome::Improved,
            features: ClinicalFeatures {
                age_group: AgeGroup::Adult,
                chief_complaint: complaint.to_string(),
                top_symptoms: Vec::new(),
                key_vitals: Default::default(),
                risk_factors: Vec::new(),
            },
            source_pack: None,
            predicted_code: None,
        }
    }

    #[test]
    fn query_returns_newest_first_and_honours_limit() {
        let repository = InMemoryFeedbackRepository::with_records(vec![
            record("s-1", "fever", 1),
            record("s-2", "chest_pain", 2),
            record("s-3", "Fever", 3),
        ]);

        let fever = repository
            .query(&FeedbackQuery {
                chief_complaint: Some("fever".to_string()),
                limit: Some(1),
                ..FeedbackQuery::default()
            })
            .expect("query succeeds");

        assert_eq!(fever.len(), 1);
        assert_eq!(fever[0].session_id, "s-3");
        assert_eq!(repository.len(), 3);
    }

    #[test]
    fn parse_date_reports_bad_input() {
        assert!(parse_date("2024-05-01").is_ok());
        assert!(parse_date("05/01/2024").unwrap_err().contains("YYYY-MM-DD"));
    }
}
