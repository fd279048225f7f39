//! Builds community packs from guideline-derived rule drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    normalize_topic, CoverageMap, RuleEffect, RuleMetadata, RulePack, RulePackMetadata,
    RulePackRule, TriageColor, Urgency,
};

/// Confidence recorded on synthesized rules, which carry no clinical review.
const SYNTHETIC_RULE_CONFIDENCE: f64 = 0.5;

/// Minimal description of a rule before it is packaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    pub conditions: Vec<String>,
    pub priority: u8,
    #[serde(default)]
    pub advice: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub condition_code: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RuleDraft {
    pub fn new(name: impl Into<String>, conditions: Vec<String>, priority: u8) -> Self {
        Self {
            name: name.into(),
            conditions,
            priority,
            advice: None,
            action: None,
            condition_code: None,
            citation: None,
            tags: Vec::new(),
        }
    }

    pub fn with_condition_code(mut self, code: impl Into<String>) -> Self {
        self.condition_code = Some(code.into());
        self
    }
}

/// Colour and urgency for a synthesized rule: 1 is Red, 2 Yellow, 3 and beyond Green.
pub fn disposition_for_priority(priority: u8) -> (TriageColor, Urgency) {
    match priority {
        0 | 1 => (TriageColor::Red, Urgency::Immediate),
        2 => (TriageColor::Yellow, Urgency::Urgent),
        _ => (TriageColor::Green, Urgency::Routine),
    }
}

/// Packages drafts for `topic`. No coverage map is declared, so the pack is
/// graded by rule count.
pub fn synthesize(
    topic: &str,
    source: &str,
    version: &str,
    drafts: Vec<RuleDraft>,
    now: DateTime<Utc>,
) -> RulePack {
    let topic = normalize_topic(topic);
    let stamp = now.format("%Y-%m-%d").to_string();

    let rules = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let (triage, urgency) = disposition_for_priority(draft.priority);
            let advice = draft
                .advice
                .unwrap_or_else(|| format!("{}: {} review", draft.name, urgency_phrase(urgency)));
            RulePackRule {
                id: format!("{topic}-{:03}", index + 1),
                name: draft.name,
                conditions: draft.conditions,
                effects: vec![RuleEffect {
                    triage,
                    advice,
                    action: draft.action,
                    urgency,
                }],
                priority: draft.priority.max(1),
                metadata: Some(RuleMetadata {
                    condition_code: draft.condition_code,
                    citation: draft.citation,
                    tags: draft.tags,
                    confidence: Some(SYNTHETIC_RULE_CONFIDENCE),
                    last_updated: Some(stamp.clone()),
                }),
            }
        })
        .collect::<Vec<_>>();

    RulePack {
        id: format!("{source}-{topic}"),
        name: format!("{} ({source})", topic.replace('_', " ")),
        version: version.to_string(),
        description: Some(format!("Synthesized {source} rules for {topic}")),
        metadata: Some(RulePackMetadata {
            source: source.to_string(),
            topics: vec![topic],
            total_rules: rules.len(),
            coverage: CoverageMap::new(),
            created_at: Some(now),
            updated_at: Some(now),
        }),
        rules,
    }
}

fn urgency_phrase(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::Immediate => "immediate",
        Urgency::Urgent => "urgent",
        Urgency::Routine => "routine",
    }
}
