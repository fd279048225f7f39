use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::clinical::assessment::{AgeGroup, PatientAssessment, Sample, Socrates, Vitals};
use crate::clinical::calibration::InMemoryCalibrationStore;
use crate::clinical::engine::Clock;
use crate::clinical::feedback::{
    ClinicalFeatures, FeedbackError, FeedbackOutcome, FeedbackQuery, FeedbackRecord,
    FeedbackRepository, KeyVitals,
};
use crate::clinical::rulepack::synth::{synthesize, RuleDraft};
use crate::clinical::rulepack::{
    CoverageLevel, PackSource, RuleEffect, RulePack, RulePackMetadata, RulePackRule,
    RulePackStore, StoreError, TriageColor, Urgency,
};
use crate::clinical::service::DecisionService;
use crate::config::EngineConfig;

pub(super) fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Clock moved by hand.
pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// Rule-pack store that counts every read and can be switched offline.
#[derive(Default)]
pub(super) struct MemoryStore {
    packs: Mutex<HashMap<(PackSource, String), RulePack>>,
    corrupt: Mutex<Vec<(PackSource, String)>>,
    reads: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub(super) fn put(&self, source: PackSource, topic: &str, pack: RulePack) {
        self.packs
            .lock()
            .expect("store mutex poisoned")
            .insert((source, topic.to_string()), pack);
    }

    pub(super) fn mark_corrupt(&self, source: PackSource, topic: &str) {
        self.corrupt
            .lock()
            .expect("store mutex poisoned")
            .push((source, topic.to_string()));
    }

    pub(super) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(super) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl RulePackStore for MemoryStore {
    fn get(
        &self,
        source: PackSource,
        topic: &str,
        _version: Option<&str>,
    ) -> Result<Option<RulePack>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("object store offline".to_string()));
        }
        let key = (source, topic.to_string());
        if self
            .corrupt
            .lock()
            .expect("store mutex poisoned")
            .contains(&key)
        {
            let parse_error = serde_json::from_str::<RulePack>("{ not json")
                .expect_err("fixture is malformed");
            return Err(StoreError::Corrupt {
                path: format!("{}/{topic}.json", source.label()).into(),
                source: parse_error,
            });
        }
        Ok(self
            .packs
            .lock()
            .expect("store mutex poisoned")
            .get(&key)
            .cloned())
    }

    fn list(&self, source: PackSource) -> Result<Vec<RulePack>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("object store offline".to_string()));
        }
        Ok(self
            .packs
            .lock()
            .expect("store mutex poisoned")
            .iter()
            .filter(|((tier, _), _)| *tier == source)
            .map(|(_, pack)| pack.clone())
            .collect())
    }
}

#[derive(Default)]
pub(super) struct MemoryFeedback {
    records: Mutex<Vec<FeedbackRecord>>,
}

impl MemoryFeedback {
    pub(super) fn with_records(records: Vec<FeedbackRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub(super) fn records(&self) -> Vec<FeedbackRecord> {
        self.records.lock().expect("feedback mutex poisoned").clone()
    }
}

impl FeedbackRepository for MemoryFeedback {
    fn record(&self, record: FeedbackRecord) -> Result<FeedbackRecord, FeedbackError> {
        self.records
            .lock()
            .expect("feedback mutex poisoned")
            .push(record.clone());
        Ok(record)
    }

    fn query(&self, query: &FeedbackQuery) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let guard = self.records.lock().expect("feedback mutex poisoned");
        let mut matched = guard
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect::<Vec<_>>();
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

pub(super) struct UnavailableFeedback;

impl FeedbackRepository for UnavailableFeedback {
    fn record(&self, _record: FeedbackRecord) -> Result<FeedbackRecord, FeedbackError> {
        Err(FeedbackError::Unavailable("feedback database down".to_string()))
    }

    fn query(&self, _query: &FeedbackQuery) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        Err(FeedbackError::Unavailable("feedback database down".to_string()))
    }
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        cache_ttl: std::time::Duration::from_secs(300),
        ..EngineConfig::default()
    }
}

pub(super) fn rule(id: &str, priority: u8, conditions: &[&str], triage: TriageColor) -> RulePackRule {
    RulePackRule {
        id: id.to_string(),
        name: format!("rule {id}"),
        conditions: conditions.iter().map(|text| text.to_string()).collect(),
        effects: vec![RuleEffect {
            triage,
            advice: format!("advice for {id}"),
            action: None,
            urgency: match triage {
                TriageColor::Red => Urgency::Immediate,
                TriageColor::Orange | TriageColor::Yellow => Urgency::Urgent,
                TriageColor::Green => Urgency::Routine,
            },
        }],
        priority,
        metadata: None,
    }
}

pub(super) fn pack(id: &str, topics: &[&str], rules: Vec<RulePackRule>) -> RulePack {
    RulePack {
        id: id.to_string(),
        name: id.to_string(),
        version: "1.0.0".to_string(),
        description: None,
        metadata: Some(RulePackMetadata {
            source: "curated".to_string(),
            topics: topics.iter().map(|topic| topic.to_string()).collect(),
            total_rules: rules.len(),
            coverage: Default::default(),
            created_at: Some(at(1, 8)),
            updated_at: None,
        }),
        rules,
    }
}

/// Pack with `count` fever rules and no declared coverage.
pub(super) fn sized_pack(id: &str, topic: &str, count: usize) -> RulePack {
    let rules = (0..count)
        .map(|index| rule(&format!("{id}-{index:03}"), 2, &["fever"], TriageColor::Yellow))
        .collect();
    pack(id, &[topic], rules)
}

pub(super) fn declared_pack(id: &str, topic: &str, level: CoverageLevel) -> RulePack {
    let mut pack = pack(
        id,
        &[topic],
        vec![
            rule("cp-001", 1, &["chest pain", "hypotension"], TriageColor::Red),
            rule("cp-002", 2, &["tachycardia"], TriageColor::Orange),
            rule("cp-003", 3, &[], TriageColor::Green),
        ],
    );
    if let Some(metadata) = pack.metadata.as_mut() {
        metadata.coverage.insert(topic.to_string(), level);
    }
    pack
}

pub(super) fn community_pack(topic: &str, rules: usize) -> RulePack {
    let drafts = (0..rules)
        .map(|index| RuleDraft::new(format!("draft {index}"), vec!["fever".to_string()], 2))
        .collect();
    synthesize(topic, "community", "2024.05", drafts, at(2, 9))
}

pub(super) fn chest_pain_assessment() -> PatientAssessment {
    PatientAssessment {
        vitals: Vitals {
            hr: Some(112),
            rr: Some(18),
            sbp: Some(124),
            dbp: Some(80),
            spo2: Some(97),
            temp: Some(36.8),
            gcs: Some(15),
        },
        sample: Sample {
            signs_symptoms: vec!["diaphoresis".to_string()],
            past_history: vec!["diabetes".to_string()],
            ..Sample::default()
        },
        socrates: Socrates {
            site: Some("central chest".to_string()),
            severity: Some(6),
            ..Socrates::default()
        },
        ..PatientAssessment::default()
    }
}

pub(super) fn chest_pain_features() -> ClinicalFeatures {
    ClinicalFeatures {
        age_group: AgeGroup::Adult,
        chief_complaint: "chest_pain".to_string(),
        top_symptoms: vec!["diaphoresis".to_string()],
        key_vitals: KeyVitals {
            hr: Some(110),
            sbp: Some(120),
            ..KeyVitals::default()
        },
        risk_factors: vec!["diabetes".to_string()],
    }
}

pub(super) fn feedback(
    session: &str,
    diagnosis: &str,
    outcome: FeedbackOutcome,
    features: ClinicalFeatures,
) -> FeedbackRecord {
    FeedbackRecord {
        session_id: session.to_string(),
        submitted_by: None,
        recorded_at: at(3, 12),
        confirmed_diagnosis: diagnosis.to_string(),
        outcome,
        features,
        source_pack: None,
        predicted_code: None,
    }
}

pub(super) type TestService = DecisionService<MemoryStore, MemoryFeedback, InMemoryCalibrationStore>;

pub(super) struct Harness {
    pub(super) store: Arc<MemoryStore>,
    pub(super) feedback: Arc<MemoryFeedback>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) service: Arc<TestService>,
}

pub(super) fn harness() -> Harness {
    harness_with(MemoryStore::default(), MemoryFeedback::default())
}

pub(super) fn harness_with(store: MemoryStore, feedback: MemoryFeedback) -> Harness {
    let store = Arc::new(store);
    let feedback = Arc::new(feedback);
    let clock = Arc::new(ManualClock::new(at(10, 9)));
    let service = Arc::new(DecisionService::with_clock(
        store.clone(),
        feedback.clone(),
        Arc::new(InMemoryCalibrationStore::new()),
        &engine_config(),
        clock.clone(),
    ));
    Harness {
        store,
        feedback,
        clock,
        service,
    }
}

pub(super) async fn read_json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
