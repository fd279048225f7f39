use super::{CoverageGrade, RulePack};

/// Rule-count thresholds applied when a pack declares no coverage map.
///
/// The 20/10/5 defaults are heuristics carried over unchanged and are pending
/// clinical review; deployments can override them through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageThresholds {
    pub full: usize,
    pub partial: usize,
    pub minimal: usize,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            full: 20,
            partial: 10,
            minimal: 5,
        }
    }
}

/// Grades how completely a rule pack covers its topics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageClassifier {
    thresholds: CoverageThresholds,
}

impl CoverageClassifier {
    pub fn new(thresholds: CoverageThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> CoverageThresholds {
        self.thresholds
    }

    pub fn classify(&self, pack: &RulePack) -> CoverageGrade {
        let Some(metadata) = pack.metadata.as_ref() else {
            return CoverageGrade::None;
        };
        if pack.rules.is_empty() {
            return CoverageGrade::None;
        }

        // Explicit declarations win; the best declared level is taken.
        if let Some(best) = metadata.coverage.values().copied().max() {
            return best.into();
        }

        self.grade_for_count(pack.rules.len())
    }

    pub fn grade_for_count(&self, rule_count: usize) -> CoverageGrade {
        let CoverageThresholds {
            full,
            partial,
            minimal,
        } = self.thresholds;

        if rule_count >= full {
            CoverageGrade::Full
        } else if rule_count >= partial {
            CoverageGrade::Partial
        } else if rule_count >= minimal {
            CoverageGrade::Minimal
        } else {
            CoverageGrade::None
        }
    }
}
