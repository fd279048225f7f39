use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::store::{PackSource, RulePackStore, StoreError};
use super::{normalize_topic, RulePack};
use crate::config::EngineConfig;

const ACTIVE_MARKER: &str = "ACTIVE";

/// Directory-backed store.
///
/// Layout under `root`:
/// - `<primary>/<topic>.json` (or `<primary>/<version>/<topic>.json`)
/// - `<community>/<topic>.json`, or inside `<community>/<version>/` when an
///   `ACTIVE` marker names the current version
/// - legacy multi-topic archives named `<community>-<topic>.json`
#[derive(Debug, Clone)]
pub struct FsRulePackStore {
    root: PathBuf,
    primary_dir: String,
    community_dir: String,
}

impl FsRulePackStore {
    pub fn new(
        root: impl Into<PathBuf>,
        primary_dir: impl Into<String>,
        community_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            primary_dir: primary_dir.into(),
            community_dir: community_dir.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.rule_pack_root.clone(),
            config.primary_dir.clone(),
            config.community_dir.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn base_dir(&self, source: PackSource) -> PathBuf {
        match source {
            PackSource::Primary => self.root.join(&self.primary_dir),
            PackSource::Community => self.root.join(&self.community_dir),
        }
    }

    /// Version named by the community `ACTIVE` marker, if any.
    pub fn active_version(&self) -> Option<String> {
        let marker = self.base_dir(PackSource::Community).join(ACTIVE_MARKER);
        match fs::read_to_string(&marker) {
            Ok(contents) => {
                let version = contents.trim();
                (!version.is_empty()).then(|| version.to_string())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %marker.display(), error = %err, "unreadable ACTIVE marker ignored");
                None
            }
        }
    }

    fn version_dir(&self, source: PackSource, version: Option<&str>) -> PathBuf {
        let base = self.base_dir(source);
        let selected = match (source, version) {
            (_, Some(version)) => Some(version.to_string()),
            (PackSource::Community, None) => self.active_version(),
            (PackSource::Primary, None) => None,
        };
        match selected {
            Some(version) => base.join(version),
            None => base,
        }
    }

    fn candidate_paths(&self, source: PackSource, topic: &str, version: Option<&str>) -> Vec<PathBuf> {
        let dir = self.version_dir(source, version);
        let mut candidates = vec![dir.join(format!("{topic}.json"))];

        if source == PackSource::Community {
            let legacy = format!("{}-{topic}.json", self.community_dir);
            let base = self.base_dir(source);
            candidates.push(dir.join(&legacy));
            if dir != base {
                candidates.push(base.join(legacy));
            }
        }

        candidates
    }

    fn read_pack(path: &Path) -> Result<Option<RulePack>, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut pack: RulePack =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(declared) = pack.repair_rule_count() {
            warn!(
                path = %path.display(),
                declared,
                actual = pack.rules.len(),
                "totalRules disagreed with rule list; corrected on load"
            );
        }

        Ok(Some(pack))
    }

    fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %dir.display(), "rule pack directory missing");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(StoreError::Unavailable(format!(
                    "cannot list {}: {err}",
                    dir.display()
                )))
            }
        };

        let mut files = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    warn!(path = %dir.display(), error = %err, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    /// Writes a new immutable artifact. Existing artifacts are never replaced.
    pub fn publish(
        &self,
        source: PackSource,
        topic: &str,
        version: Option<&str>,
        pack: &RulePack,
    ) -> Result<PathBuf, StoreError> {
        let topic = normalize_topic(topic);
        let dir = match version {
            Some(version) => self.base_dir(source).join(version),
            None => self.base_dir(source),
        };
        let path = dir.join(format!("{topic}.json"));

        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let encoded = serde_json::to_vec_pretty(pack).map_err(|source| StoreError::Encode {
            id: pack.id.clone(),
            source,
        })?;

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Conflict { path })
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        file.write_all(&encoded)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), pack = %pack.id, "rule pack published");
        Ok(path)
    }

    /// Points the community tier at a published version directory.
    pub fn activate(&self, version: &str) -> Result<(), StoreError> {
        let base = self.base_dir(PackSource::Community);
        if !base.join(version).is_dir() {
            return Err(StoreError::UnknownVersion(version.to_string()));
        }
        let marker = base.join(ACTIVE_MARKER);
        fs::write(&marker, format!("{version}\n")).map_err(|source| StoreError::Io {
            path: marker,
            source,
        })
    }
}

impl RulePackStore for FsRulePackStore {
    fn get(
        &self,
        source: PackSource,
        topic: &str,
        version: Option<&str>,
    ) -> Result<Option<RulePack>, StoreError> {
        let topic = normalize_topic(topic);
        for path in self.candidate_paths(source, &topic, version) {
            match Self::read_pack(&path) {
                Ok(Some(pack)) => {
                    debug!(path = %path.display(), tier = source.label(), "rule pack read");
                    return Ok(Some(pack));
                }
                Ok(None) => {}
                Err(err @ StoreError::Unavailable(_)) => return Err(err),
                // An unreadable artifact is a miss for that path only.
                Err(err) => warn!(error = %err, tier = source.label(), "skipping unreadable rule pack"),
            }
        }
        Ok(None)
    }

    fn list(&self, source: PackSource) -> Result<Vec<RulePack>, StoreError> {
        let dir = self.version_dir(source, None);
        let base = self.base_dir(source);

        let mut files = Self::json_files(&dir)?;
        if source == PackSource::Community && dir != base {
            files.extend(Self::json_files(&base)?);
        }

        let mut packs = Vec::with_capacity(files.len());
        for path in files {
            match Self::read_pack(&path) {
                Ok(Some(pack)) => packs.push(pack),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "skipping unreadable rule pack"),
            }
        }
        Ok(packs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical::rulepack::synth::{synthesize, RuleDraft};
    use crate::clinical::rulepack::{
        CoverageClassifier, CoverageGrade, LoadSource, RulePackResolver,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn store(root: &Path) -> FsRulePackStore {
        FsRulePackStore::new(root, "curated", "community")
    }

    fn sample_pack(topic: &str, rules: usize) -> RulePack {
        let drafts = (0..rules)
            .map(|index| RuleDraft::new(format!("rule {index}"), vec!["fever".to_string()], 2))
            .collect();
        synthesize(
            topic,
            "community",
            "1.0.0",
            drafts,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().expect("valid timestamp"),
        )
    }

    #[test]
    fn missing_root_reads_as_absent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store(&dir.path().join("does-not-exist"));

        assert!(store
            .get(PackSource::Primary, "fever", None)
            .expect("lookup succeeds")
            .is_none());
        assert!(store
            .list(PackSource::Community)
            .expect("listing succeeds")
            .is_empty());
    }

    #[test]
    fn publish_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store(dir.path());
        let pack = sample_pack("fever", 5);

        store
            .publish(PackSource::Community, "Fever", Some("2024.03"), &pack)
            .expect("first publish succeeds");
        match store.publish(PackSource::Community, "fever", Some("2024.03"), &pack) {
            Err(StoreError::Conflict { path }) => assert!(path.ends_with("fever.json")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn active_marker_selects_versioned_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store(dir.path());

        store
            .publish(PackSource::Community, "fever", Some("v1"), &sample_pack("fever", 5))
            .expect("v1 published");
        store
            .publish(PackSource::Community, "fever", Some("v2"), &sample_pack("fever", 11))
            .expect("v2 published");

        store.activate("v2").expect("v2 activates");
        assert_eq!(store.active_version().as_deref(), Some("v2"));
        let active = store
            .get(PackSource::Community, "fever", None)
            .expect("lookup succeeds")
            .expect("pack present");
        assert_eq!(active.rules.len(), 11);

        let pinned = store
            .get(PackSource::Community, "fever", Some("v1"))
            .expect("lookup succeeds")
            .expect("pack present");
        assert_eq!(pinned.rules.len(), 5);
    }

    #[test]
    fn activate_rejects_unknown_versions() {
        let dir = tempfile::tempdir().expect("temp dir");
        match store(dir.path()).activate("v9") {
            Err(StoreError::UnknownVersion(version)) => assert_eq!(version, "v9"),
            other => panic!("expected unknown version, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_legacy_flat_file_naming() {
        let dir = tempfile::tempdir().expect("temp dir");
        let community = dir.path().join("community");
        fs::create_dir_all(&community).expect("community dir");
        let encoded = serde_json::to_vec(&sample_pack("headache", 6)).expect("encode");
        fs::write(community.join("community-headache.json"), encoded).expect("write legacy file");

        let pack = store(dir.path())
            .get(PackSource::Community, "Headache", None)
            .expect("lookup succeeds")
            .expect("legacy archive found");
        assert_eq!(pack.rules.len(), 6);
    }

    #[test]
    fn corrupt_files_are_misses_on_get_and_skipped_on_list() {
        let dir = tempfile::tempdir().expect("temp dir");
        let community = dir.path().join("community");
        fs::create_dir_all(&community).expect("community dir");
        fs::write(community.join("fever.json"), b"{ not json").expect("write corrupt");
        fs::write(
            community.join("sepsis.json"),
            serde_json::to_vec(&sample_pack("sepsis", 5)).expect("encode"),
        )
        .expect("write valid");

        let store = store(dir.path());
        assert!(store
            .get(PackSource::Community, "fever", None)
            .expect("corruption is not a lookup error")
            .is_none());
        let listed = store.list(PackSource::Community).expect("listing succeeds");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].covers_topic("sepsis"));
    }

    #[test]
    fn corrupt_topic_file_does_not_hide_legacy_archive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let community = dir.path().join("community");
        fs::create_dir_all(&community).expect("community dir");
        fs::write(community.join("fever.json"), b"{ not json").expect("write corrupt");
        let mut legacy = sample_pack("fever", 6);
        if let Some(metadata) = legacy.metadata.as_mut() {
            metadata.topics.clear();
        }
        fs::write(
            community.join("community-fever.json"),
            serde_json::to_vec(&legacy).expect("encode"),
        )
        .expect("write legacy file");

        let store = Arc::new(store(dir.path()));
        let pack = store
            .get(PackSource::Community, "fever", None)
            .expect("lookup succeeds")
            .expect("legacy archive found");
        assert_eq!(pack.rules.len(), 6);

        let resolved = RulePackResolver::new(store, CoverageClassifier::default())
            .resolve("fever")
            .expect("resolution succeeds");
        assert!(resolved.success);
        assert_eq!(resolved.source, LoadSource::Community);
        assert_eq!(resolved.coverage, CoverageGrade::Minimal);
    }
}
