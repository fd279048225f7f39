//! Integration scenarios for rule-pack publication, resolution, and the
//! decision workflow built on top of a directory-backed store.
//!
//! Everything goes through the public crate surface: packs are published to a
//! temporary directory, resolved through the tiered resolver, and then driven
//! through the decision service the way the HTTP layer would.

mod common {
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use triage_engine::clinical::assessment::{PatientAssessment, Socrates, Vitals};
    use triage_engine::clinical::feedback::{
        FeedbackError, FeedbackQuery, FeedbackRecord, FeedbackRepository,
    };
    use triage_engine::clinical::rulepack::synth::{synthesize, RuleDraft};
    use triage_engine::clinical::{FsRulePackStore, RulePack};
    use triage_engine::config::EngineConfig;

    #[derive(Default)]
    pub struct SharedFeedback {
        records: Arc<Mutex<Vec<FeedbackRecord>>>,
    }

    impl SharedFeedback {
        pub fn len(&self) -> usize {
            self.records.lock().expect("feedback mutex poisoned").len()
        }
    }

    impl FeedbackRepository for SharedFeedback {
        fn record(&self, record: FeedbackRecord) -> Result<FeedbackRecord, FeedbackError> {
            let mut guard = self.records.lock().expect("feedback mutex poisoned");
            guard.push(record.clone());
            Ok(record)
        }

        fn query(&self, query: &FeedbackQuery) -> Result<Vec<FeedbackRecord>, FeedbackError> {
            let guard = self.records.lock().expect("feedback mutex poisoned");
            Ok(guard
                .iter()
                .filter(|record| query.matches(record))
                .cloned()
                .collect())
        }
    }

    pub fn workspace() -> (TempDir, FsRulePackStore, EngineConfig) {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = EngineConfig {
            rule_pack_root: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let store = FsRulePackStore::from_config(&config);
        (dir, store, config)
    }

    /// Synthesized pack with `count` rules. The first two react to fever and
    /// tachycardia; the remainder are unconditional housekeeping advice.
    pub fn fever_pack(source: &str, count: usize) -> RulePack {
        let mut drafts = vec![
            RuleDraft::new(
                "Febrile tachycardia",
                vec!["fever".to_string(), "tachycardia".to_string()],
                1,
            )
            .with_condition_code("A41.9"),
            RuleDraft::new("Fever workup", vec!["fever".to_string()], 2)
                .with_condition_code("R50.9"),
        ];
        drafts.extend(
            (drafts.len()..count).map(|index| RuleDraft::new(format!("Advice {index}"), Vec::new(), 3)),
        );
        drafts.truncate(count);
        let now = Utc
            .with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
            .single()
            .expect("valid timestamp");
        synthesize("fever", source, "2024.05", drafts, now)
    }

    pub fn febrile_assessment() -> PatientAssessment {
        PatientAssessment {
            vitals: Vitals {
                hr: Some(118),
                rr: Some(20),
                sbp: Some(118),
                dbp: Some(74),
                spo2: Some(97),
                temp: Some(39.2),
                gcs: Some(15),
            },
            socrates: Socrates {
                site: Some("generalised".to_string()),
                ..Socrates::default()
            },
            ..PatientAssessment::default()
        }
    }
}

use std::sync::Arc;

use common::*;
use triage_engine::clinical::calibration::{CalibrationBasis, InMemoryCalibrationStore};
use triage_engine::clinical::feedback::FeedbackOutcome;
use triage_engine::clinical::rulepack::{
    CoverageClassifier, CoverageGrade, LoadSource, PackSource, RulePackResolver, RulePackStore,
    StoreError,
};
use triage_engine::clinical::service::{DecisionRequest, DecisionService, PredictionRef};
use triage_engine::clinical::{ClinicalFeatures, FeedbackSubmission};

#[test]
fn community_versions_become_visible_only_once_activated() {
    let (_dir, store, config) = workspace();
    store
        .publish(PackSource::Primary, "fever", None, &fever_pack("curated", 3))
        .expect("primary publishes");
    store
        .publish(
            PackSource::Community,
            "Fever",
            Some("2024-05"),
            &fever_pack("community", 12),
        )
        .expect("community publishes");

    let store = Arc::new(store);
    let resolver = RulePackResolver::new(store.clone(), CoverageClassifier::new(config.coverage));

    let before = resolver.resolve("fever").expect("resolves");
    assert!(!before.success);
    assert_eq!(before.source, LoadSource::FallbackNeeded);

    store.activate("2024-05").expect("version exists");
    let after = resolver.resolve("FEVER").expect("resolves");
    assert!(after.success);
    assert_eq!(after.source, LoadSource::Community);
    assert_eq!(after.coverage, CoverageGrade::Partial);
    assert_eq!(
        after.rule_pack.map(|pack| pack.id),
        Some("community-fever".to_string())
    );
}

#[test]
fn published_artifacts_are_immutable() {
    let (_dir, store, _config) = workspace();
    let pack = fever_pack("curated", 6);

    let path = store
        .publish(PackSource::Primary, "fever", None, &pack)
        .expect("first publish");
    assert!(path.ends_with("curated/fever.json"));

    assert!(matches!(
        store.publish(PackSource::Primary, "fever", None, &pack),
        Err(StoreError::Conflict { .. })
    ));
    assert!(matches!(
        store.activate("2031-01"),
        Err(StoreError::UnknownVersion(_))
    ));

    let read = store
        .get(PackSource::Primary, "Fever", None)
        .expect("readable")
        .expect("present");
    assert_eq!(read, pack);
}

#[tokio::test]
async fn feedback_moves_decisions_from_history_to_stored_modifiers() {
    let (_dir, store, config) = workspace();
    store
        .publish(PackSource::Primary, "fever", None, &fever_pack("curated", 6))
        .expect("primary publishes");

    let feedback = Arc::new(SharedFeedback::default());
    let service = DecisionService::new(
        Arc::new(store),
        feedback.clone(),
        Arc::new(InMemoryCalibrationStore::new()),
        &config,
    );
    let request = DecisionRequest {
        topic: "fever".to_string(),
        assessment: febrile_assessment(),
        features: None,
    };

    let first = service.decide(request.clone()).await.expect("decision succeeds");
    assert!(first.rules.success);
    assert_eq!(first.rules.coverage, CoverageGrade::Minimal);
    let top = &first.recommendations[0];
    assert_eq!(top.recommendation.rule_id, "fever-001");
    assert_eq!(top.recommendation.condition_code, "A41.9");
    assert_eq!(top.calibrated.basis, CalibrationBasis::Uncalibrated);
    assert_eq!(first.triage.color.label(), "Red");

    let features = ClinicalFeatures::from_assessment("fever", &febrile_assessment());
    for session in ["enc-1", "enc-2", "enc-3"] {
        service
            .submit_feedback(FeedbackSubmission {
                session_id: session.to_string(),
                submitted_by: None,
                confirmed_diagnosis: "A41.9".to_string(),
                outcome: FeedbackOutcome::Improved,
                features: features.clone(),
                prediction: Some(PredictionRef {
                    condition_code: top.recommendation.condition_code.clone(),
                    predicted_confidence: top.recommendation.confidence,
                    source_pack: "curated-fever".to_string(),
                }),
            })
            .expect("feedback accepted");
    }
    assert_eq!(feedback.len(), 3);

    let second = service.decide(request).await.expect("decision succeeds");
    let top = second
        .recommendations
        .iter()
        .find(|item| item.recommendation.rule_id == "fever-001")
        .expect("rule still applies");
    assert_eq!(top.calibrated.basis, CalibrationBasis::Modifier);
    assert_eq!(top.calibrated.successes, 3);
    assert!(top.calibrated.confidence > top.calibrated.base);
}
