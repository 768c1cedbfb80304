//! Connascence analysis engine.
//!
//! [`Engine`] wires the bundled language adapters into an
//! [`AnalysisPipeline`] and exposes the run entry points together with the
//! pure policy queries.
//!
//! ```no_run
//! use connascence::{AnalysisRequest, Engine};
//!
//! let engine = Engine::from_project(".".as_ref())?;
//! let report = engine.analyze(&AnalysisRequest::new(vec![".".into()], "strict"));
//! println!("passed: {}", report.passed());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::path::Path;

use anyhow::{Context, Result};

pub use connascence_core::aggregate::{GateCheck, RunMetrics};
pub use connascence_core::config::{
    AnalysisConfig, DetectorsConfig, DuplicationConfig, PoolConfig, RulesConfig, ScoringConfig,
};
pub use connascence_core::duplication::DuplicationResult;
pub use connascence_core::pipeline::{find_project_root, FileAnalysis};
pub use connascence_core::policy::{PolicySpec, Thresholds};
pub use connascence_core::recommend::Effort;
pub use connascence_core::rules::RuleCompliance;
pub use connascence_core::*;
pub use connascence_python::PythonAdapter;

/// Adapters shipped with the engine.
pub fn default_adapters() -> Result<Vec<Box<dyn LanguageAdapter>>> {
    let python = PythonAdapter::new().context("failed to initialize Python adapter")?;
    Ok(vec![Box::new(python)])
}

/// Analysis engine over the bundled adapters.
pub struct Engine {
    pipeline: AnalysisPipeline,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_adapters(default_adapters()?, config)
    }

    /// Engine over caller-supplied adapters.
    pub fn with_adapters(adapters: Vec<Box<dyn LanguageAdapter>>, config: Config) -> Result<Self> {
        let pipeline =
            AnalysisPipeline::new(adapters, config).context("invalid analysis configuration")?;
        Ok(Self { pipeline })
    }

    /// Engine configured from the `.connascence.toml` governing `dir`.
    pub fn from_project(dir: &Path) -> Result<Self> {
        let root = find_project_root(dir).unwrap_or_else(|| dir.to_path_buf());
        tracing::debug!(root = %root.display(), "loading project configuration");
        let config = Config::load_or_default(&root)
            .with_context(|| format!("failed to load configuration for '{}'", root.display()))?;
        Self::new(config)
    }

    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    pub fn analyze(&self, request: &AnalysisRequest) -> AnalysisReport {
        self.pipeline.analyze(request)
    }

    pub fn analyze_with_cancel(
        &self,
        request: &AnalysisRequest,
        token: &CancellationToken,
    ) -> AnalysisReport {
        self.pipeline.analyze_with_cancel(request, token)
    }

    /// Analysis that reuses `.connascence/cache.json` under `project_root`.
    pub fn analyze_incremental(
        &self,
        request: &AnalysisRequest,
        project_root: &Path,
    ) -> AnalysisReport {
        self.pipeline.analyze_incremental(request, project_root)
    }

    pub fn list_available_policies(&self) -> Vec<&str> {
        self.pipeline.policies().list_available_policies()
    }

    pub fn validate_policy_name(&self, name: &str) -> bool {
        self.pipeline.policies().validate_policy_name(name)
    }

    /// Canonical name for a policy name or legacy alias.
    pub fn resolve_policy_name(&self, alias: &str) -> Option<&str> {
        self.pipeline.policies().resolve_policy_name(alias)
    }

    /// Grouped refactoring suggestions for a finished report.
    pub fn recommendations(&self, report: &AnalysisReport) -> Vec<RecommendationGroup> {
        summarize(report.violations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_adapters_cover_python() {
        let adapters = default_adapters().unwrap();
        assert!(adapters.iter().any(|a| a.language() == "python"));
    }

    #[test]
    fn test_policy_queries() {
        let engine = Engine::new(Config::default()).unwrap();
        let names = engine.list_available_policies();
        assert!(names.contains(&"standard"));
        assert!(names.contains(&"strict"));
        assert!(engine.validate_policy_name("STRICT"));
        assert!(!engine.validate_policy_name("foo"));
    }

    #[test]
    fn test_from_project_surfaces_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(config::CONFIG_FILE),
            "[duplication]\nsimilarity_threshold = 1.5\n",
        )
        .unwrap();
        let err = Engine::from_project(tmp.path()).err().unwrap();
        assert!(format!("{err:#}").contains("similarity_threshold"), "{err:#}");
    }

    #[test]
    fn test_from_project_without_config_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::from_project(tmp.path()).unwrap();
        assert_eq!(engine.config().duplication.similarity_threshold, 0.8);
    }
}
