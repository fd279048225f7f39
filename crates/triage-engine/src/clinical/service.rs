use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::assessment::PatientAssessment;
use super::calibration::{
    validate_confidence, ActualOutcome, CalibratedConfidence, CalibrationError, CalibrationKey,
    CalibrationModifier, CalibrationService, CalibrationStore, DecayReport,
};
use super::engine::{
    Clock, EngineError, Recommendation, RuleEngine, RuleEngineResult, SystemClock,
};
use super::feedback::{
    summarize, ClinicalFeatures, FeedbackError, FeedbackOutcome, FeedbackQuery, FeedbackRecord,
    FeedbackRepository, FeedbackSummary,
};
use super::rulepack::{RuleLoadResult, RulePackStore};
use super::triage::{TriageResult, TriageScorer};
use crate::config::EngineConfig;

/// Composes rule resolution, triage scoring, and calibration for request handlers.
pub struct DecisionService<S, F, C> {
    engine: Arc<RuleEngine<S>>,
    scorer: TriageScorer,
    calibration: CalibrationService<C, F>,
    clock: Arc<dyn Clock>,
    resolve_timeout: Duration,
}

impl<S, F, C> DecisionService<S, F, C>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    pub fn new(store: Arc<S>, feedback: Arc<F>, calibration: Arc<C>, config: &EngineConfig) -> Self {
        Self::with_clock(store, feedback, calibration, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        feedback: Arc<F>,
        calibration: Arc<C>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: Arc::new(RuleEngine::with_clock(store, config, clock.clone())),
            scorer: TriageScorer::new(config.conditions),
            calibration: CalibrationService::with_clock(
                calibration,
                feedback,
                config,
                clock.clone(),
            ),
            clock,
            resolve_timeout: config.resolve_timeout,
        }
    }

    pub fn engine(&self) -> &RuleEngine<S> {
        &self.engine
    }

    pub fn calibration(&self) -> &CalibrationService<C, F> {
        &self.calibration
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Resolution bounded by the configured timeout. A timeout is a miss,
    /// never an error.
    pub async fn resolve(
        &self,
        topic: &str,
        force_refresh: bool,
    ) -> Result<RuleLoadResult, DecisionServiceError> {
        let engine = Arc::clone(&self.engine);
        let owned = topic.to_string();
        let task = tokio::task::spawn_blocking(move || engine.load_rule_pack(&owned, force_refresh));

        match tokio::time::timeout(self.resolve_timeout, task).await {
            Ok(joined) => {
                let result = joined.map_err(|err| DecisionServiceError::Worker(err.to_string()))?;
                Ok(result?)
            }
            Err(_) => {
                warn!(
                    topic,
                    timeout_ms = self.resolve_timeout.as_millis() as u64,
                    "rule pack resolution timed out"
                );
                Ok(RuleLoadResult::fallback_needed(format!(
                    "rule pack resolution for '{topic}' timed out"
                )))
            }
        }
    }

    /// Bounded resolution followed by rule evaluation.
    pub async fn apply_rules(
        &self,
        topic: &str,
        assessment: &PatientAssessment,
    ) -> Result<RuleEngineResult, DecisionServiceError> {
        let load = self.resolve(topic, false).await?;
        Ok(self.engine.apply_loaded(&load, assessment))
    }

    pub fn score_triage(&self, assessment: &PatientAssessment) -> TriageResult {
        self.scorer.score(assessment)
    }

    /// Rules, triage, and per-recommendation calibrated confidence.
    pub async fn decide(
        &self,
        request: DecisionRequest,
    ) -> Result<DecisionOutcome, DecisionServiceError> {
        let DecisionRequest {
            topic,
            assessment,
            features,
        } = request;

        let rules = self.apply_rules(&topic, &assessment).await?;
        let triage = self
            .scorer
            .score_with_recommendations(&assessment, &rules.recommendations);

        let features =
            features.unwrap_or_else(|| ClinicalFeatures::from_assessment(&topic, &assessment));
        let source_pack = rules.rule_pack_id.clone().unwrap_or_default();

        let mut recommendations = Vec::with_capacity(rules.recommendations.len());
        for recommendation in &rules.recommendations {
            let key = CalibrationKey::new(
                &topic,
                &recommendation.condition_code,
                assessment.age_group,
                &source_pack,
            );
            let calibrated =
                self.calibration
                    .calibrate(&key, recommendation.confidence, Some(&features))?;
            recommendations.push(CalibratedRecommendation {
                recommendation: recommendation.clone(),
                calibrated,
            });
        }
        recommendations.sort_by(|left, right| {
            left.recommendation
                .priority
                .cmp(&right.recommendation.priority)
                .then_with(|| {
                    right
                        .calibrated
                        .confidence
                        .total_cmp(&left.calibrated.confidence)
                })
        });

        Ok(DecisionOutcome {
            triage,
            rules,
            recommendations,
        })
    }

    /// Records confirmed feedback and, when it references a prediction,
    /// counts it against that prediction's calibration key.
    pub fn submit_feedback(
        &self,
        submission: FeedbackSubmission,
    ) -> Result<FeedbackReceipt, DecisionServiceError> {
        if submission.session_id.trim().is_empty() {
            return Err(FeedbackError::Invalid("session id is required".to_string()).into());
        }
        if submission.confirmed_diagnosis.trim().is_empty() {
            return Err(FeedbackError::Invalid("confirmed diagnosis is required".to_string()).into());
        }
        if let Some(prediction) = &submission.prediction {
            validate_confidence(prediction.predicted_confidence)?;
        }

        let FeedbackSubmission {
            session_id,
            submitted_by,
            confirmed_diagnosis,
            outcome,
            features,
            prediction,
        } = submission;

        let record = self.calibration.feedback().record(FeedbackRecord {
            session_id,
            submitted_by,
            recorded_at: self.clock.now(),
            confirmed_diagnosis,
            outcome,
            features,
            source_pack: prediction
                .as_ref()
                .map(|prediction| prediction.source_pack.clone()),
            predicted_code: prediction
                .as_ref()
                .map(|prediction| prediction.condition_code.trim().to_string()),
        })?;
        info!(
            complaint = %record.features.chief_complaint,
            outcome = ?record.outcome,
            "feedback recorded"
        );

        let modifier = match prediction {
            Some(prediction) => {
                let key = CalibrationKey::new(
                    &record.features.chief_complaint,
                    &prediction.condition_code,
                    record.features.age_group,
                    &prediction.source_pack,
                );
                let actual = if record
                    .confirmed_diagnosis
                    .trim()
                    .eq_ignore_ascii_case(key.condition_code.as_str())
                {
                    ActualOutcome::Confirmed
                } else {
                    ActualOutcome::Refuted
                };
                Some(
                    self.calibration
                        .update(&key, actual, prediction.predicted_confidence)?,
                )
            }
            None => None,
        };

        Ok(FeedbackReceipt { record, modifier })
    }

    pub fn feedback_summary(
        &self,
        query: &FeedbackQuery,
    ) -> Result<FeedbackSummary, DecisionServiceError> {
        let records = self.calibration.feedback().query(query)?;
        Ok(summarize(&records))
    }

    pub fn decay(&self) -> Result<DecayReport, DecisionServiceError> {
        Ok(self.calibration.decay(self.clock.now())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub topic: String,
    pub assessment: PatientAssessment,
    /// Derived from the assessment when omitted.
    #[serde(default)]
    pub features: Option<ClinicalFeatures>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibratedRecommendation {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub calibrated: CalibratedConfidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub triage: TriageResult,
    pub rules: RuleEngineResult,
    pub recommendations: Vec<CalibratedRecommendation>,
}

/// The prediction a feedback submission confirms or refutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRef {
    pub condition_code: String,
    pub predicted_confidence: f64,
    pub source_pack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub session_id: String,
    #[serde(default)]
    pub submitted_by: Option<String>,
    pub confirmed_diagnosis: String,
    pub outcome: FeedbackOutcome,
    pub features: ClinicalFeatures,
    #[serde(default)]
    pub prediction: Option<PredictionRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReceipt {
    pub record: FeedbackRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<CalibrationModifier>,
}

/// Error raised by the decision service.
#[derive(Debug, thiserror::Error)]
pub enum DecisionServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error("resolution worker failed: {0}")]
    Worker(String),
}
