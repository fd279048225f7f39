use std::cmp::Reverse;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::coverage::CoverageClassifier;
use super::store::{PackSource, RulePackStore, StoreError};
use super::{normalize_topic, CoverageGrade, LoadSource, RuleLoadResult, RulePack};

/// Picks the best available pack for a topic: primary, then community, then
/// a `fallback-needed` signal. Packs from different tiers are never merged.
pub struct RulePackResolver<S> {
    store: Arc<S>,
    classifier: CoverageClassifier,
}

impl<S> RulePackResolver<S>
where
    S: RulePackStore,
{
    pub fn new(store: Arc<S>, classifier: CoverageClassifier) -> Self {
        Self { store, classifier }
    }

    pub fn classifier(&self) -> &CoverageClassifier {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolves `topic` after normalization.
    ///
    /// Absent or corrupt artifacts are logged and treated as misses. Only a
    /// store that reports itself unavailable produces an error.
    pub fn resolve(&self, topic: &str) -> Result<RuleLoadResult, ResolveError> {
        let topic = normalize_topic(topic);
        if topic.is_empty() {
            return Ok(RuleLoadResult::fallback_needed(
                "no topic supplied; defer to external guidance",
            ));
        }

        if let Some(pack) = self.fetch(PackSource::Primary, &topic)? {
            let coverage = self.classifier.classify(&pack);
            if coverage != CoverageGrade::None {
                info!(%topic, pack = %pack.id, %coverage, "resolved from primary source");
                return Ok(RuleLoadResult::found(pack, coverage, LoadSource::Primary));
            }
            debug!(%topic, pack = %pack.id, "primary pack has no coverage; trying community");
        }

        if let Some(pack) = self.community_candidate(&topic)? {
            let coverage = self.classifier.classify(&pack);
            if coverage != CoverageGrade::None {
                info!(%topic, pack = %pack.id, %coverage, "resolved from community source");
                return Ok(RuleLoadResult::found(pack, coverage, LoadSource::Community));
            }
            debug!(%topic, pack = %pack.id, "community pack has no coverage");
        }

        info!(%topic, "no rule pack coverage; fallback needed");
        Ok(RuleLoadResult::fallback_needed(format!(
            "no rule pack with usable coverage for '{topic}'; defer to external guidance"
        )))
    }

    fn community_candidate(&self, topic: &str) -> Result<Option<RulePack>, ResolveError> {
        if let Some(pack) = self.fetch(PackSource::Community, topic)? {
            return Ok(Some(pack));
        }

        let packs = match self.store.list(PackSource::Community) {
            Ok(packs) => packs,
            Err(StoreError::Unavailable(reason)) => {
                return Err(ResolveError::StorageUnavailable(reason))
            }
            Err(err) => {
                warn!(%topic, error = %err, "community scan failed; treating as miss");
                return Ok(None);
            }
        };

        let mut matching = packs
            .into_iter()
            .filter(|pack| pack.covers_topic(topic))
            .collect::<Vec<_>>();
        // Newest first; packs without timestamps sort last.
        matching.sort_by_key(|pack| Reverse(pack.freshness()));

        Ok(matching.into_iter().next())
    }

    fn fetch(&self, source: PackSource, topic: &str) -> Result<Option<RulePack>, ResolveError> {
        match self.store.get(source, topic, None) {
            Ok(pack) => Ok(pack),
            Err(StoreError::Unavailable(reason)) => Err(ResolveError::StorageUnavailable(reason)),
            Err(err) => {
                warn!(%topic, tier = source.label(), error = %err, "skipping unreadable rule pack");
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("rule pack storage unavailable: {0}")]
    StorageUnavailable(String),
}
