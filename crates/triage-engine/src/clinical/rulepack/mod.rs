//! Versioned rule-pack artifacts and the policy that picks one for a topic.
//!
//! Packs are JSON documents written once and never mutated; a new version is
//! a new artifact. [`RulePackResolver`] walks the storage tiers in priority
//! order and reports what it found as a [`RuleLoadResult`].

mod coverage;
mod fs;
mod resolver;
mod store;
pub mod synth;

pub use coverage::{CoverageClassifier, CoverageThresholds};
pub use fs::FsRulePackStore;
pub use resolver::{ResolveError, RulePackResolver};
pub use store::{PackSource, RulePackStore, StoreError};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bundle of triage rules for one or more chief complaints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePack {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<RulePackRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RulePackMetadata>,
}

impl RulePack {
    /// Whether the pack declares `topic` (already normalized) in its metadata.
    pub fn covers_topic(&self, topic: &str) -> bool {
        self.metadata
            .as_ref()
            .map(|metadata| {
                metadata
                    .topics
                    .iter()
                    .any(|candidate| normalize_topic(candidate) == topic)
            })
            .unwrap_or(false)
    }

    /// Most recent of `updatedAt` / `createdAt`, used to pick the newest community pack.
    pub fn freshness(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.updated_at.or(metadata.created_at))
    }

    /// Restores `totalRules == rules.len()`, returning the previously declared count on mismatch.
    pub(crate) fn repair_rule_count(&mut self) -> Option<usize> {
        let actual = self.rules.len();
        let metadata = self.metadata.as_mut()?;
        if metadata.total_rules == actual {
            return None;
        }
        let declared = metadata.total_rules;
        metadata.total_rules = actual;
        Some(declared)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePackMetadata {
    pub source: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub total_rules: usize,
    #[serde(default)]
    pub coverage: CoverageMap,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Declared coverage per chief-complaint key. Absent keys carry no declaration.
pub type CoverageMap = BTreeMap<String, CoverageLevel>;

/// Level a curated pack may declare for a complaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageLevel {
    Minimal,
    Partial,
    Full,
}

/// How completely a pack addresses a topic. Ordered from `None` to `Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageGrade {
    None,
    Minimal,
    Partial,
    Full,
}

impl From<CoverageLevel> for CoverageGrade {
    fn from(level: CoverageLevel) -> Self {
        match level {
            CoverageLevel::Minimal => CoverageGrade::Minimal,
            CoverageLevel::Partial => CoverageGrade::Partial,
            CoverageLevel::Full => CoverageGrade::Full,
        }
    }
}

impl fmt::Display for CoverageGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CoverageGrade::None => "none",
            CoverageGrade::Minimal => "minimal",
            CoverageGrade::Partial => "partial",
            CoverageGrade::Full => "full",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePackRule {
    pub id: String,
    pub name: String,
    /// Disjunctive: any satisfied condition activates the rule.
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub effects: Vec<RuleEffect>,
    /// 1 is the most urgent.
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RuleMetadata>,
}

impl RulePackRule {
    /// Diagnosis the rule argues for, as recorded on clinician feedback.
    /// Rules without a declared code are identified by their id.
    pub fn condition_code(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.condition_code.as_deref())
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleMetadata {
    /// Diagnosis label (e.g. an ICD-10 code) confirmed outcomes are matched against.
    pub condition_code: Option<String>,
    pub citation: Option<String>,
    pub tags: Vec<String>,
    pub confidence: Option<f64>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEffect {
    pub triage: TriageColor,
    pub advice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub urgency: Urgency,
}

/// Triage colour, declared from least to most severe so `Ord` follows acuity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriageColor {
    Green,
    Yellow,
    Orange,
    Red,
}

impl TriageColor {
    pub fn label(&self) -> &'static str {
        match self {
            TriageColor::Red => "Red",
            TriageColor::Orange => "Orange",
            TriageColor::Yellow => "Yellow",
            TriageColor::Green => "Green",
        }
    }

    /// One step more severe, saturating at `Red`.
    pub fn escalate(self) -> Self {
        match self {
            TriageColor::Green => TriageColor::Yellow,
            TriageColor::Yellow => TriageColor::Orange,
            TriageColor::Orange | TriageColor::Red => TriageColor::Red,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Immediate,
    Urgent,
    Routine,
}

/// Which tier produced a resolution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadSource {
    Primary,
    Community,
    FallbackNeeded,
}

/// Outcome of one resolution. `success` is never true with `coverage == none`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleLoadResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_pack: Option<RulePack>,
    pub coverage: CoverageGrade,
    pub source: LoadSource,
    pub message: String,
}

impl RuleLoadResult {
    pub(crate) fn found(pack: RulePack, coverage: CoverageGrade, source: LoadSource) -> Self {
        debug_assert!(coverage != CoverageGrade::None);
        let message = format!(
            "loaded {} v{} ({} rules, {} coverage) from {} source",
            pack.id,
            pack.version,
            pack.rules.len(),
            coverage,
            match source {
                LoadSource::Primary => "primary",
                LoadSource::Community => "community",
                LoadSource::FallbackNeeded => "fallback",
            }
        );
        Self {
            success: true,
            rule_pack: Some(pack),
            coverage,
            source,
            message,
        }
    }

    /// Signals the caller to defer to an out-of-band fallback. Not a failure of triage.
    pub fn fallback_needed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            rule_pack: None,
            coverage: CoverageGrade::None,
            source: LoadSource::FallbackNeeded,
            message: message.into(),
        }
    }
}

/// Trims, joins inner whitespace with `_`, and lower-cases a topic.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}
