use std::path::PathBuf;

use super::RulePack;

/// Storage tier a pack is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackSource {
    /// Curated, clinically reviewed packs.
    Primary,
    /// Community-derived or auto-generated packs.
    Community,
}

impl PackSource {
    pub fn label(&self) -> &'static str {
        match self {
            PackSource::Primary => "primary",
            PackSource::Community => "community",
        }
    }
}

/// Version-keyed access to rule-pack artifacts.
///
/// `version == None` selects the store's current version for that tier.
/// Implementations return `Ok(None)` for absent artifacts and reserve
/// [`StoreError::Unavailable`] for a backend that cannot be reached at all.
pub trait RulePackStore: Send + Sync {
    fn get(
        &self,
        source: PackSource,
        topic: &str,
        version: Option<&str>,
    ) -> Result<Option<RulePack>, StoreError>;

    fn exists(
        &self,
        source: PackSource,
        topic: &str,
        version: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self.get(source, topic, version)?.is_some())
    }

    /// Every readable pack in the tier's current version. Unreadable artifacts are skipped.
    fn list(&self, source: PackSource) -> Result<Vec<RulePack>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt rule pack {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode rule pack {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("rule pack already published at {path}")]
    Conflict { path: PathBuf },
    #[error("version {0} has not been published")]
    UnknownVersion(String),
    #[error("rule pack storage unavailable: {0}")]
    Unavailable(String),
}
