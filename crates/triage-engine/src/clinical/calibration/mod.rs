//! Feedback-driven adjustment of diagnosis confidence.
//!
//! Each `(complaint, condition, age group, source pack)` key keeps running
//! success and failure counts. Confidence moves in log-odds space by
//! `alpha` per net success, so it always stays inside `(0, 1)`.
//!
//! Keys with no modifier yet fall back to counts estimated from similar
//! historical feedback.

pub mod bayes;
mod matching;
mod store;

pub use matching::{features_overlap, match_records, VitalTolerance};
pub use store::{CalibrationStore, InMemoryCalibrationStore};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::assessment::AgeGroup;
use super::engine::{Clock, SystemClock};
use super::feedback::{
    ClinicalFeatures, FeedbackError, FeedbackOutcome, FeedbackQuery, FeedbackRecord,
    FeedbackRepository,
};
use super::rulepack::normalize_topic;
use crate::config::EngineConfig;

/// Swap attempts before an update gives up on a contended key.
const MAX_SWAP_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationKey {
    pub chief_complaint: String,
    pub condition_code: String,
    pub age_group: AgeGroup,
    pub source_pack: String,
}

impl CalibrationKey {
    pub fn new(
        chief_complaint: &str,
        condition_code: &str,
        age_group: AgeGroup,
        source_pack: &str,
    ) -> Self {
        Self {
            chief_complaint: normalize_topic(chief_complaint),
            condition_code: condition_code.trim().to_string(),
            age_group,
            source_pack: source_pack.trim().to_lowercase(),
        }
    }

    /// Same key with the normalization applied by [`new`](Self::new).
    pub fn normalized(&self) -> Self {
        Self::new(
            &self.chief_complaint,
            &self.condition_code,
            self.age_group,
            &self.source_pack,
        )
    }
}

impl fmt::Display for CalibrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.chief_complaint,
            self.condition_code,
            self.age_group.label(),
            self.source_pack
        )
    }
}

/// Confirmed (`1`) or refuted (`0`) prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ActualOutcome {
    Refuted,
    Confirmed,
}

impl TryFrom<u8> for ActualOutcome {
    type Error = CalibrationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ActualOutcome::Refuted),
            1 => Ok(ActualOutcome::Confirmed),
            other => Err(CalibrationError::InvalidOutcome(other)),
        }
    }
}

impl From<ActualOutcome> for u8 {
    fn from(value: ActualOutcome) -> Self {
        match value {
            ActualOutcome::Refuted => 0,
            ActualOutcome::Confirmed => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationModifier {
    pub key: CalibrationKey,
    pub successes: u32,
    pub failures: u32,
    pub base_confidence: f64,
    pub adjusted_confidence: f64,
    /// `adjusted - base`.
    pub adjustment: f64,
    /// `adjusted / base`, or 1 when the base is zero.
    pub multiplier: f64,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl CalibrationModifier {
    pub fn neutral(
        key: CalibrationKey,
        base_confidence: f64,
        revision: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_counts(key, base_confidence, 0, 0, 0.0, revision, now)
    }

    fn with_counts(
        key: CalibrationKey,
        base_confidence: f64,
        successes: u32,
        failures: u32,
        alpha: f64,
        revision: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let adjusted = bayes::adjusted_confidence(base_confidence, successes, failures, alpha);
        let multiplier = if base_confidence > 0.0 {
            adjusted / base_confidence
        } else {
            1.0
        };
        Self {
            key,
            successes,
            failures,
            base_confidence,
            adjusted_confidence: adjusted,
            adjustment: adjusted - base_confidence,
            multiplier,
            revision,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationBasis {
    /// A stored modifier for the key.
    Modifier,
    /// Counts estimated from similar feedback.
    History,
    Uncalibrated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibratedConfidence {
    pub base: f64,
    pub confidence: f64,
    pub successes: u32,
    pub failures: u32,
    pub basis: CalibrationBasis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    pub examined: usize,
    pub decayed: usize,
    /// Modifiers changed by a concurrent update during the pass.
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("calibration store failure: {0}")]
    Store(String),
    #[error("calibration key {key} stayed contended after {attempts} attempts")]
    Contention { key: String, attempts: usize },
    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),
    #[error("outcome must be 0 or 1, got {0}")]
    InvalidOutcome(u8),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
}

impl CalibrationError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            CalibrationError::InvalidConfidence(_) | CalibrationError::InvalidOutcome(_)
        )
    }
}

pub struct CalibrationService<C, F> {
    store: Arc<C>,
    feedback: Arc<F>,
    alpha: f64,
    half_life: Option<Duration>,
    tolerance: VitalTolerance,
    clock: Arc<dyn Clock>,
}

impl<C, F> CalibrationService<C, F>
where
    C: CalibrationStore,
    F: FeedbackRepository,
{
    pub fn new(store: Arc<C>, feedback: Arc<F>, config: &EngineConfig) -> Self {
        Self::with_clock(store, feedback, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<C>,
        feedback: Arc<F>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let half_life = (config.calibration_half_life_days > 0)
            .then(|| Duration::days(i64::from(config.calibration_half_life_days)));
        Self {
            store,
            feedback,
            alpha: config.calibration_alpha,
            half_life,
            tolerance: VitalTolerance::default(),
            clock,
        }
    }

    pub fn with_tolerance(mut self, tolerance: VitalTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn feedback(&self) -> &Arc<F> {
        &self.feedback
    }

    /// Counts one outcome against `key` and recomputes the confidence from
    /// `predicted_confidence`. Creates the modifier on first use.
    pub fn update(
        &self,
        key: &CalibrationKey,
        outcome: ActualOutcome,
        predicted_confidence: f64,
    ) -> Result<CalibrationModifier, CalibrationError> {
        validate_confidence(predicted_confidence)?;
        let key = key.normalized();

        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let current = self.store.get(&key)?;
            let (successes, failures, revision) = match &current {
                Some(modifier) => (modifier.successes, modifier.failures, Some(modifier.revision)),
                None => (0, 0, None),
            };
            let (successes, failures) = match outcome {
                ActualOutcome::Confirmed => (successes.saturating_add(1), failures),
                ActualOutcome::Refuted => (successes, failures.saturating_add(1)),
            };

            let next = CalibrationModifier::with_counts(
                key.clone(),
                predicted_confidence,
                successes,
                failures,
                self.alpha,
                revision.map_or(1, |rev| rev + 1),
                self.clock.now(),
            );

            if self.store.compare_and_swap(&key, revision, next.clone())? {
                debug!(
                    key = %key,
                    successes,
                    failures,
                    confidence = next.adjusted_confidence,
                    "calibration updated"
                );
                return Ok(next);
            }
            debug!(key = %key, attempt, "calibration swap lost; retrying");
        }

        warn!(key = %key, "calibration update abandoned under contention");
        Err(CalibrationError::Contention {
            key: key.to_string(),
            attempts: MAX_SWAP_ATTEMPTS,
        })
    }

    pub fn get(&self, key: &CalibrationKey) -> Result<Option<CalibrationModifier>, CalibrationError> {
        self.store.get(&key.normalized())
    }

    /// Returns the key to zero counts. Absent keys stay absent.
    pub fn reset(
        &self,
        key: &CalibrationKey,
    ) -> Result<Option<CalibrationModifier>, CalibrationError> {
        let key = key.normalized();

        for _ in 0..MAX_SWAP_ATTEMPTS {
            let Some(current) = self.store.get(&key)? else {
                return Ok(None);
            };
            let neutral = CalibrationModifier::neutral(
                key.clone(),
                current.base_confidence,
                current.revision + 1,
                self.clock.now(),
            );
            if self
                .store
                .compare_and_swap(&key, Some(current.revision), neutral.clone())?
            {
                info!(key = %key, "calibration reset");
                return Ok(Some(neutral));
            }
        }

        Err(CalibrationError::Contention {
            key: key.to_string(),
            attempts: MAX_SWAP_ATTEMPTS,
        })
    }

    pub fn all(&self) -> Result<Vec<CalibrationModifier>, CalibrationError> {
        self.store.all()
    }

    /// Prior feedback resembling `features`.
    pub fn match_feedback(
        &self,
        features: &ClinicalFeatures,
        candidate_labels: &[String],
    ) -> Result<Vec<FeedbackRecord>, CalibrationError> {
        let history = self.feedback.query(&FeedbackQuery {
            chief_complaint: Some(features.chief_complaint.clone()),
            age_group: Some(features.age_group),
            ..FeedbackQuery::default()
        })?;
        Ok(match_records(history, features, candidate_labels, &self.tolerance))
    }

    /// Success and failure counts for `condition_code` among similar cases.
    ///
    /// Only cases that concern the code count: those confirmed as it, and
    /// those where it was the prediction under review. A case succeeds when
    /// it was confirmed as `condition_code` and did not worsen. Cases about
    /// other diagnoses are ignored.
    pub fn estimate(
        &self,
        features: &ClinicalFeatures,
        condition_code: &str,
    ) -> Result<(u32, u32), CalibrationError> {
        let code = condition_code.trim();
        let (mut successes, mut failures) = (0usize, 0usize);
        for record in self.match_feedback(features, &[])? {
            let confirmed = record.confirmed_diagnosis.trim().eq_ignore_ascii_case(code);
            let predicted = record
                .predicted_code
                .as_deref()
                .is_some_and(|predicted| predicted.trim().eq_ignore_ascii_case(code));
            if confirmed && record.outcome != FeedbackOutcome::Worsened {
                successes += 1;
            } else if confirmed || predicted {
                failures += 1;
            }
        }
        Ok((saturate(successes), saturate(failures)))
    }

    /// Confidence for `key`: the stored modifier if any, else an estimate
    /// from history when `features` are given, else `base` unchanged.
    pub fn calibrate(
        &self,
        key: &CalibrationKey,
        base: f64,
        features: Option<&ClinicalFeatures>,
    ) -> Result<CalibratedConfidence, CalibrationError> {
        validate_confidence(base)?;

        if let Some(modifier) = self.get(key)? {
            return Ok(CalibratedConfidence {
                base,
                confidence: bayes::adjusted_confidence(
                    base,
                    modifier.successes,
                    modifier.failures,
                    self.alpha,
                ),
                successes: modifier.successes,
                failures: modifier.failures,
                basis: CalibrationBasis::Modifier,
            });
        }

        if let Some(features) = features {
            let (successes, failures) = self.estimate(features, &key.condition_code)?;
            if successes + failures > 0 {
                return Ok(CalibratedConfidence {
                    base,
                    confidence: bayes::adjusted_confidence(base, successes, failures, self.alpha),
                    successes,
                    failures,
                    basis: CalibrationBasis::History,
                });
            }
        }

        Ok(CalibratedConfidence {
            base,
            confidence: base,
            successes: 0,
            failures: 0,
            basis: CalibrationBasis::Uncalibrated,
        })
    }

    /// Halves counts once per half-life elapsed since each modifier's last
    /// write, rounding to whole counts.
    pub fn decay(&self, now: DateTime<Utc>) -> Result<DecayReport, CalibrationError> {
        let mut report = DecayReport::default();
        let Some(half_life) = self.half_life else {
            return Ok(report);
        };

        for modifier in self.store.all()? {
            report.examined += 1;
            let elapsed = now - modifier.updated_at;
            if elapsed <= Duration::zero() {
                continue;
            }

            let factor = decay_factor(elapsed, half_life);
            let successes = scale(modifier.successes, factor);
            let failures = scale(modifier.failures, factor);
            if successes == modifier.successes && failures == modifier.failures {
                continue;
            }

            let next = CalibrationModifier::with_counts(
                modifier.key.clone(),
                modifier.base_confidence,
                successes,
                failures,
                self.alpha,
                modifier.revision + 1,
                now,
            );
            if self
                .store
                .compare_and_swap(&modifier.key, Some(modifier.revision), next)?
            {
                report.decayed += 1;
            } else {
                report.skipped += 1;
            }
        }

        info!(
            examined = report.examined,
            decayed = report.decayed,
            skipped = report.skipped,
            "calibration decay pass complete"
        );
        Ok(report)
    }
}

pub(crate) fn validate_confidence(value: f64) -> Result<(), CalibrationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CalibrationError::InvalidConfidence(value))
    }
}

fn decay_factor(elapsed: Duration, half_life: Duration) -> f64 {
    let half_lives = elapsed.num_seconds() as f64 / half_life.num_seconds() as f64;
    0.5_f64.powf(half_lives)
}

fn scale(count: u32, factor: f64) -> u32 {
    (f64::from(count) * factor).round() as u32
}

fn saturate(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
