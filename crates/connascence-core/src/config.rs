use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::AnalysisError;
use crate::policy::PolicySpec;

pub const CONFIG_FILE: &str = ".connascence.toml";

/// Top-level configuration from `.connascence.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub detectors: DetectorsConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub duplication: DuplicationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Worker threads; 0 means one per core.
    #[serde(default)]
    pub workers: usize,
    /// Run-level timeout; remaining files are skipped once it elapses.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/.venv/**".to_string(),
        "**/venv/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/node_modules/**".to_string(),
    ]
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            timeout_secs: None,
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl AnalysisConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Detector pool sizing and backpressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Live instances per detector type; 0 means one per core.
    #[serde(default)]
    pub max_per_type: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_acquire_retries")]
    pub acquire_retries: u32,
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_acquire_retries() -> u32 {
    1
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_type: 0,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            acquire_retries: default_acquire_retries(),
        }
    }
}

impl PoolConfig {
    pub fn effective_max_per_type(&self) -> usize {
        if self.max_per_type == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_per_type
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Thresholds for the connascence detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorsConfig {
    #[serde(default = "default_max_positional_params")]
    pub max_positional_params: usize,
    #[serde(default = "default_allowed_literals")]
    pub allowed_literals: Vec<String>,
    #[serde(default = "default_min_shape_nodes")]
    pub min_shape_nodes: usize,
    #[serde(default = "default_god_object_methods")]
    pub god_object_methods: usize,
    #[serde(default = "default_god_object_fields")]
    pub god_object_fields: usize,
    #[serde(default = "default_god_object_loc")]
    pub god_object_loc: usize,
}

fn default_max_positional_params() -> usize {
    3
}
fn default_allowed_literals() -> Vec<String> {
    vec![
        "0".to_string(),
        "1".to_string(),
        "-1".to_string(),
        String::new(),
    ]
}
fn default_min_shape_nodes() -> usize {
    4
}
fn default_god_object_methods() -> usize {
    20
}
fn default_god_object_fields() -> usize {
    15
}
fn default_god_object_loc() -> usize {
    500
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            max_positional_params: default_max_positional_params(),
            allowed_literals: default_allowed_literals(),
            min_shape_nodes: default_min_shape_nodes(),
            god_object_methods: default_god_object_methods(),
            god_object_fields: default_god_object_fields(),
            god_object_loc: default_god_object_loc(),
        }
    }
}

/// Thresholds and weights for the safety rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_max_function_loc")]
    pub max_function_loc: usize,
    #[serde(default = "default_assertion_min_loc")]
    pub assertion_min_loc: usize,
    #[serde(default = "default_min_assertions")]
    pub min_assertions: usize,
    #[serde(default = "default_max_decorators")]
    pub max_decorators: usize,
    #[serde(default = "default_max_attribute_depth")]
    pub max_attribute_depth: usize,
    /// Extra regexes matched against comments for the zero-warnings rule.
    #[serde(default)]
    pub suppression_patterns: Vec<String>,
    /// Per-rule weights for overall compliance; missing rules weigh 1.0.
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

fn default_max_function_loc() -> usize {
    60
}
fn default_assertion_min_loc() -> usize {
    10
}
fn default_min_assertions() -> usize {
    1
}
fn default_max_decorators() -> usize {
    3
}
fn default_max_attribute_depth() -> usize {
    3
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_function_loc: default_max_function_loc(),
            assertion_min_loc: default_assertion_min_loc(),
            min_assertions: default_min_assertions(),
            max_decorators: default_max_decorators(),
            max_attribute_depth: default_max_attribute_depth(),
            suppression_patterns: Vec::new(),
            weights: BTreeMap::new(),
        }
    }
}

/// Token-similarity clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicationConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,
    #[serde(default = "default_num_hashes")]
    pub num_hashes: usize,
    #[serde(default = "default_bands")]
    pub bands: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
}

fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_shingle_size() -> usize {
    5
}
fn default_num_hashes() -> usize {
    64
}
fn default_bands() -> usize {
    16
}
fn default_min_tokens() -> usize {
    30
}
fn default_min_lines() -> usize {
    5
}

impl Default for DuplicationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            shingle_size: default_shingle_size(),
            num_hashes: default_num_hashes(),
            bands: default_bands(),
            min_tokens: default_min_tokens(),
            min_lines: default_min_lines(),
        }
    }
}

/// Weights for the overall quality score (normalized by their sum)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_connascence_weight")]
    pub connascence_weight: f64,
    #[serde(default = "default_compliance_weight")]
    pub compliance_weight: f64,
    #[serde(default = "default_duplication_weight")]
    pub duplication_weight: f64,
}

fn default_connascence_weight() -> f64 {
    0.4
}
fn default_compliance_weight() -> f64 {
    0.35
}
fn default_duplication_weight() -> f64 {
    0.25
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            connascence_weight: default_connascence_weight(),
            compliance_weight: default_compliance_weight(),
            duplication_weight: default_duplication_weight(),
        }
    }
}

impl Config {
    /// Load configuration from a `.connascence.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in '{}'", path.display()))?;
        Ok(config)
    }

    /// Load from `.connascence.toml` in the given directory or any ancestor.
    /// Defaults apply only when no file exists; a file that fails to read,
    /// parse or validate is an error.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let start = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let mut current = start.as_path();
        loop {
            let config_path = current.join(CONFIG_FILE);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "loading config");
                return Self::load(&config_path);
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        tracing::debug!(dir = %start.display(), "no {CONFIG_FILE} found, using defaults");
        Ok(Self::default())
    }

    /// Reject values that would make analysis meaningless.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let d = &self.duplication;
        if !(d.similarity_threshold > 0.0 && d.similarity_threshold <= 1.0) {
            return Err(AnalysisError::Configuration(format!(
                "duplication.similarity_threshold must be in (0, 1], got {}",
                d.similarity_threshold
            )));
        }
        if d.shingle_size == 0 {
            return Err(AnalysisError::Configuration(
                "duplication.shingle_size must be positive".to_string(),
            ));
        }
        if d.bands == 0 || d.num_hashes == 0 || d.num_hashes % d.bands != 0 {
            return Err(AnalysisError::Configuration(format!(
                "duplication.num_hashes ({}) must be a positive multiple of duplication.bands ({})",
                d.num_hashes, d.bands
            )));
        }
        if self.detectors.max_positional_params == 0 {
            return Err(AnalysisError::Configuration(
                "detectors.max_positional_params must be positive".to_string(),
            ));
        }
        if let Some((rule, w)) = self.rules.weights.iter().find(|(_, w)| **w < 0.0) {
            return Err(AnalysisError::Configuration(format!(
                "rules.weights.{rule} must not be negative, got {w}"
            )));
        }
        let s = &self.scoring;
        let weights = [s.connascence_weight, s.compliance_weight, s.duplication_weight];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(AnalysisError::Configuration(
                "scoring weights must be non-negative with a positive sum".to_string(),
            ));
        }
        for pattern in &self.rules.suppression_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                AnalysisError::Configuration(format!(
                    "invalid rules.suppression_patterns entry '{pattern}': {e}"
                ))
            })?;
        }
        Ok(())
    }

    /// Hash of every setting that influences per-file results.
    pub fn fingerprint(&self) -> String {
        let relevant = (&self.detectors, &self.rules, &self.duplication);
        let encoded = serde_json::to_string(&relevant).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Generate default TOML content for a new project.
    pub fn default_toml() -> String {
        r#"# Connascence analysis configuration

[analysis]
# 0 = one worker per core
workers = 0
# timeout_secs = 300
exclude_patterns = ["**/.git/**", "**/.venv/**", "**/venv/**", "**/__pycache__/**", "**/node_modules/**"]

[pool]
# Live detector instances per type; 0 = one per core
max_per_type = 0
acquire_timeout_ms = 5000
acquire_retries = 1

[detectors]
max_positional_params = 3
allowed_literals = ["0", "1", "-1", ""]
min_shape_nodes = 4
god_object_methods = 20
god_object_fields = 15
god_object_loc = 500

[rules]
max_function_loc = 60
assertion_min_loc = 10
min_assertions = 1
max_decorators = 3
max_attribute_depth = 3
# suppression_patterns = ["fmt: off"]

# [rules.weights]
# bounded_loops = 2.0

[duplication]
similarity_threshold = 0.8
shingle_size = 5
num_hashes = 64
bands = 16
min_tokens = 30
min_lines = 5

[scoring]
connascence_weight = 0.4
compliance_weight = 0.35
duplication_weight = 0.25

# Project policies extend the built-ins (standard, strict, lenient, nasa-compliance).
# [[policies]]
# name = "team"
# base = "standard"
# max_god_objects = 2
# [policies.weights]
# timing = 2.0
"#
        .to_string()
    }
}
