use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::FileAnalysis;

/// Cache entry for a single file's analysis results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFileResult {
    pub hash: String,
    pub analysis: FileAnalysis,
}

/// Per-file results stored in `.connascence/cache.json`.
///
/// Valid only for the configuration it was built with; a cache whose
/// fingerprint differs from the current one is discarded on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisCache {
    pub config_fingerprint: String,
    pub files: BTreeMap<String, CachedFileResult>,
}

const CACHE_DIR: &str = ".connascence";
const CACHE_FILE: &str = "cache.json";

impl AnalysisCache {
    pub fn new(config_fingerprint: &str) -> Self {
        Self {
            config_fingerprint: config_fingerprint.to_string(),
            files: BTreeMap::new(),
        }
    }

    /// Load the cache for `config_fingerprint`, or an empty one when none
    /// exists or it was built under different settings.
    pub fn load(project_root: &Path, config_fingerprint: &str) -> Result<Self> {
        let cache_path = project_root.join(CACHE_DIR).join(CACHE_FILE);
        if !cache_path.exists() {
            return Ok(Self::new(config_fingerprint));
        }
        let content =
            std::fs::read_to_string(&cache_path).context("failed to read analysis cache")?;
        let cache: Self =
            serde_json::from_str(&content).context("failed to parse analysis cache")?;
        if cache.config_fingerprint != config_fingerprint {
            tracing::debug!("configuration changed; discarding analysis cache");
            return Ok(Self::new(config_fingerprint));
        }
        Ok(cache)
    }

    pub fn save(&self, project_root: &Path) -> Result<()> {
        let cache_dir = project_root.join(CACHE_DIR);
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create {CACHE_DIR} directory"))?;
        let cache_path = cache_dir.join(CACHE_FILE);
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize analysis cache")?;
        std::fs::write(&cache_path, content).context("failed to write analysis cache")?;
        Ok(())
    }

    pub fn is_stale(&self, rel_path: &str, content: &str) -> bool {
        self.get(rel_path, content).is_none()
    }

    /// Cached result for a file if its content is unchanged.
    pub fn get(&self, rel_path: &str, content: &str) -> Option<&FileAnalysis> {
        let cached = self.files.get(rel_path)?;
        (cached.hash == compute_hash(content)).then_some(&cached.analysis)
    }

    /// Store a file's result. Degraded results are refused so a faulted
    /// detector gets another chance on the next run.
    pub fn insert(&mut self, rel_path: String, content: &str, analysis: FileAnalysis) -> bool {
        if analysis.degraded {
            self.files.remove(&rel_path);
            return false;
        }
        self.files.insert(
            rel_path,
            CachedFileResult {
                hash: compute_hash(content),
                analysis,
            },
        );
        true
    }

    /// Remove entries for files that no longer exist.
    pub fn prune(&mut self, existing_files: &[String]) {
        let existing: BTreeSet<&str> = existing_files.iter().map(String::as_str).collect();
        self.files.retain(|path, _| existing.contains(path.as_str()));
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// SHA-256 of file content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn analysis(degraded: bool) -> FileAnalysis {
        FileAnalysis {
            path: PathBuf::from("pkg/mod.py"),
            loc: 12,
            degraded,
            ..FileAnalysis::default()
        }
    }

    #[test]
    fn test_compute_hash_deterministic() {
        assert_eq!(compute_hash("x = 1"), compute_hash("x = 1"));
        assert_ne!(compute_hash("x = 1"), compute_hash("x = 2"));
    }

    #[test]
    fn test_get_requires_matching_content() {
        let mut cache = AnalysisCache::new("fp");
        assert!(cache.insert("pkg/mod.py".to_string(), "x = 1", analysis(false)));
        assert!(cache.get("pkg/mod.py", "x = 1").is_some());
        assert!(cache.get("pkg/mod.py", "x = 2").is_none());
        assert!(cache.is_stale("pkg/other.py", "x = 1"));
    }

    #[test]
    fn test_degraded_results_are_not_cached() {
        let mut cache = AnalysisCache::new("fp");
        cache.insert("a.py".to_string(), "x", analysis(false));
        assert!(!cache.insert("a.py".to_string(), "x", analysis(true)));
        assert!(cache.is_empty(), "stale entry is dropped too");
    }

    #[test]
    fn test_prune() {
        let mut cache = AnalysisCache::new("fp");
        cache.insert("a.py".to_string(), "a", analysis(false));
        cache.insert("b.py".to_string(), "b", analysis(false));
        cache.prune(&["a.py".to_string()]);
        assert_eq!(cache.len(), 1);
        assert!(cache.files.contains_key("a.py"));
    }

    #[test]
    fn test_save_load_and_fingerprint_invalidation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = AnalysisCache::new("fp-1");
        cache.insert("a.py".to_string(), "a", analysis(false));
        cache.save(tmp.path()).unwrap();

        let loaded = AnalysisCache::load(tmp.path(), "fp-1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("a.py", "a").unwrap().loc, 12);

        let invalidated = AnalysisCache::load(tmp.path(), "fp-2").unwrap();
        assert!(invalidated.is_empty());
        assert_eq!(invalidated.config_fingerprint, "fp-2");
    }
}
