//! Cached rule-pack evaluation against a patient assessment.

mod cache;
mod conditions;

pub use cache::{Clock, RulePackCache, SystemClock};
pub use conditions::{Condition, ConditionKind, ConditionThresholds};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::assessment::PatientAssessment;
use super::rulepack::{
    normalize_topic, CoverageClassifier, CoverageGrade, LoadSource, ResolveError, RuleLoadResult,
    RulePack, RulePackResolver, RulePackRule, RulePackStore, TriageColor, Urgency,
};
use crate::config::EngineConfig;

/// Confidence assigned to rules that carry no conditions.
pub const UNCONDITIONAL_RULE_CONFIDENCE: f64 = 0.5;

/// Ranked advice produced by one effect of an applicable rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub rule_id: String,
    /// Diagnosis the rule argues for; calibration is keyed on it.
    pub condition_code: String,
    pub priority: u8,
    pub triage: TriageColor,
    pub advice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub urgency: Urgency,
    /// Share of the rule's conditions satisfied, in `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEngineResult {
    pub success: bool,
    pub rules: Vec<RulePackRule>,
    pub recommendations: Vec<Recommendation>,
    pub coverage: CoverageGrade,
    pub source: LoadSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_pack_id: Option<String>,
}

impl RuleEngineResult {
    /// Empty result carrying the resolver's explanation.
    pub fn degraded(load: &RuleLoadResult) -> Self {
        Self {
            success: false,
            rules: Vec::new(),
            recommendations: Vec::new(),
            coverage: CoverageGrade::None,
            source: LoadSource::FallbackNeeded,
            message: load.message.clone(),
            rule_pack_id: None,
        }
    }

    /// The most severe colour any recommendation carries.
    pub fn most_urgent(&self) -> Option<&Recommendation> {
        self.recommendations.iter().max_by(|left, right| {
            left.triage
                .cmp(&right.triage)
                .then(right.priority.cmp(&left.priority))
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Resolves packs through a TTL cache and evaluates their rules.
pub struct RuleEngine<S> {
    resolver: RulePackResolver<S>,
    cache: RulePackCache,
    clock: Arc<dyn Clock>,
    thresholds: ConditionThresholds,
}

impl<S> RuleEngine<S>
where
    S: RulePackStore,
{
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: RulePackResolver::new(store, CoverageClassifier::new(config.coverage)),
            cache: RulePackCache::new(config.cache_ttl),
            clock,
            thresholds: config.conditions,
        }
    }

    pub fn resolver(&self) -> &RulePackResolver<S> {
        &self.resolver
    }

    pub fn cache(&self) -> &RulePackCache {
        &self.cache
    }

    /// Memoized resolution. `force_refresh` skips the cache unconditionally.
    pub fn load_rule_pack(
        &self,
        topic: &str,
        force_refresh: bool,
    ) -> Result<RuleLoadResult, EngineError> {
        let key = normalize_topic(topic);

        if !force_refresh {
            if let Some(hit) = self.cache.get(&key, self.clock.now()) {
                debug!(topic = %key, "rule pack cache hit");
                return Ok(hit);
            }
        }

        let result = self.resolver.resolve(&key)?;
        self.cache.insert(key, result.clone(), self.clock.now());
        Ok(result)
    }

    pub fn apply_rules(
        &self,
        topic: &str,
        assessment: &PatientAssessment,
    ) -> Result<RuleEngineResult, EngineError> {
        let load = self.load_rule_pack(topic, false)?;
        Ok(self.apply_loaded(&load, assessment))
    }

    /// Evaluates an already resolved pack. Unsuccessful loads degrade to an
    /// empty result carrying the load's coverage and message.
    pub fn apply_loaded(
        &self,
        load: &RuleLoadResult,
        assessment: &PatientAssessment,
    ) -> RuleEngineResult {
        let pack = match (&load.rule_pack, load.success) {
            (Some(pack), true) => pack,
            _ => return RuleEngineResult::degraded(load),
        };

        let (rules, recommendations) = self.evaluate_pack(pack, assessment);
        let message = format!(
            "{} of {} rules applicable; {}",
            rules.len(),
            pack.rules.len(),
            load.message
        );

        RuleEngineResult {
            success: true,
            rules,
            recommendations,
            coverage: load.coverage,
            source: load.source,
            message,
            rule_pack_id: Some(pack.id.clone()),
        }
    }

    /// Applicable rules and their ranked recommendations.
    pub fn evaluate_pack(
        &self,
        pack: &RulePack,
        assessment: &PatientAssessment,
    ) -> (Vec<RulePackRule>, Vec<Recommendation>) {
        let mut applicable = Vec::new();
        let mut recommendations = Vec::new();

        for rule in &pack.rules {
            let Some(confidence) = rule_confidence(rule, assessment, &self.thresholds) else {
                continue;
            };

            recommendations.extend(rule.effects.iter().map(|effect| Recommendation {
                rule_id: rule.id.clone(),
                condition_code: rule.condition_code().to_string(),
                priority: rule.priority,
                triage: effect.triage,
                advice: effect.advice.clone(),
                action: effect.action.clone(),
                urgency: effect.urgency,
                confidence,
            }));
            applicable.push(rule.clone());
        }

        rank_recommendations(&mut recommendations);
        (applicable, recommendations)
    }
}

/// `Some(confidence)` when the rule applies: matched/total conditions, or the
/// fixed default for conditionless rules.
pub fn rule_confidence(
    rule: &RulePackRule,
    assessment: &PatientAssessment,
    thresholds: &ConditionThresholds,
) -> Option<f64> {
    if rule.conditions.is_empty() {
        return Some(UNCONDITIONAL_RULE_CONFIDENCE);
    }

    let matched = rule
        .conditions
        .iter()
        .filter(|text| Condition::parse(text).matches(assessment, thresholds))
        .count();

    (matched > 0).then(|| matched as f64 / rule.conditions.len() as f64)
}

/// Most urgent priority first, then strongest evidence. Stable for ties.
pub fn rank_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| right.confidence.total_cmp(&left.confidence))
    });
}
