use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::aggregate::{self, AggregateInput, AnalysisReport, RunMetrics};
use crate::analyzer::LanguageAdapter;
use crate::ast::SourceUnit;
use crate::cache::AnalysisCache;
use crate::config::{Config, CONFIG_FILE};
use crate::detectors::DetectorKind;
use crate::duplication::{DuplicationAnalyzer, FileFingerprints, FingerprintIndex};
use crate::error::AnalysisError;
use crate::policy::{PolicyRegistry, ThresholdOverrides, DEFAULT_POLICY};
use crate::pool::DetectorPool;
use crate::rules::{RuleEngine, RuleId, RuleTally};
use crate::types::{Diagnostic, DiagnosticKind, Violation};

/// What to analyze and against which policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// Files and directories, in order. Directories are walked.
    pub paths: Vec<PathBuf>,
    pub policy: String,
    pub overrides: ThresholdOverrides,
}

impl AnalysisRequest {
    pub fn new(paths: Vec<PathBuf>, policy: impl Into<String>) -> Self {
        Self {
            paths,
            policy: policy.into(),
            overrides: ThresholdOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ThresholdOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_POLICY)
    }
}

/// Cooperative cancellation flag, checked before each file.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything extracted from one file. The `SourceUnit` itself is dropped
/// once this is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    /// Effective lines of code.
    pub loc: usize,
    /// Unweighted detector and rule violations.
    pub violations: Vec<Violation>,
    pub rule_tallies: BTreeMap<RuleId, RuleTally>,
    pub fingerprints: FileFingerprints,
    /// At least one detector produced no result for this file.
    pub degraded: bool,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Per-file outcome before merging.
enum FileOutcome {
    Analyzed {
        analysis: FileAnalysis,
        from_cache: bool,
        rel_path: String,
        content: String,
    },
    Skipped(Diagnostic),
    NotRun(Diagnostic),
}

/// Reusable analysis pipeline. Holds only read-only state; every run
/// builds its own detector pool.
pub struct AnalysisPipeline {
    adapters: Vec<Box<dyn LanguageAdapter>>,
    config: Config,
    policies: PolicyRegistry,
    rules: RuleEngine,
    duplication: DuplicationAnalyzer,
    excludes: GlobSet,
    workers: rayon::ThreadPool,
}

impl AnalysisPipeline {
    /// Build a pipeline, rejecting invalid configuration before any file is
    /// touched.
    pub fn new(
        adapters: Vec<Box<dyn LanguageAdapter>>,
        config: Config,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        let policies = PolicyRegistry::load(&config.policies)?;
        let rules = RuleEngine::new(&config.rules)?;
        let duplication = DuplicationAnalyzer::new(&config.duplication);
        let excludes = build_globset(&config.analysis.exclude_patterns)?;
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.analysis.effective_workers())
            .thread_name(|i| format!("connascence-worker-{i}"))
            .build()
            .map_err(|e| AnalysisError::Configuration(format!("failed to start workers: {e}")))?;

        Ok(Self {
            adapters,
            config,
            policies,
            rules,
            duplication,
            excludes,
            workers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Run a full analysis.
    pub fn analyze(&self, request: &AnalysisRequest) -> AnalysisReport {
        self.run(request, &CancellationToken::new(), None)
    }

    /// Run a full analysis that stops picking up files once `token` is
    /// cancelled.
    pub fn analyze_with_cancel(
        &self,
        request: &AnalysisRequest,
        token: &CancellationToken,
    ) -> AnalysisReport {
        self.run(request, token, None)
    }

    /// Run an analysis reusing cached results for unchanged files under
    /// `project_root`.
    pub fn analyze_incremental(
        &self,
        request: &AnalysisRequest,
        project_root: &Path,
    ) -> AnalysisReport {
        self.run(request, &CancellationToken::new(), Some(project_root))
    }

    fn run(
        &self,
        request: &AnalysisRequest,
        token: &CancellationToken,
        project_root: Option<&Path>,
    ) -> AnalysisReport {
        let started = Instant::now();
        let deadline = self.config.analysis.timeout().map(|t| started + t);
        let mut diagnostics = Vec::new();

        let resolution = self.policies.resolve(&request.policy);
        diagnostics.extend(resolution.warning);
        let policy = resolution.policy.with_overrides(&request.overrides);

        let mut cache = project_root.map(|root| {
            let fingerprint = self.config.fingerprint();
            AnalysisCache::load(root, &fingerprint).unwrap_or_else(|e| {
                tracing::warn!("failed to load analysis cache: {e:#}");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::CacheError,
                    format!("failed to load analysis cache: {e:#}"),
                ));
                AnalysisCache::new(&fingerprint)
            })
        });

        let files = self.collect_files(&request.paths, &mut diagnostics);
        let unsupported = diagnostics
            .iter()
            .filter(|d| matches!(d.kind, DiagnosticKind::UnsupportedFile | DiagnosticKind::ReadError))
            .count();
        tracing::debug!(files = files.len(), policy = %policy.name, "starting analysis");

        let pool = DetectorPool::new(&self.config.detectors, &self.config.pool);
        let outcomes: Vec<FileOutcome> = self.workers.install(|| {
            files
                .par_iter()
                .map(|(path, adapter)| {
                    self.process(
                        path,
                        self.adapters[*adapter].as_ref(),
                        &pool,
                        token,
                        deadline,
                        project_root,
                        cache.as_ref(),
                    )
                })
                .collect()
        });

        let mut violations = Vec::new();
        let mut rule_tallies: BTreeMap<RuleId, RuleTally> = BTreeMap::new();
        let mut fingerprints = Vec::new();
        let mut current_files = Vec::new();
        let mut metrics = RunMetrics {
            files_skipped: unsupported,
            ..RunMetrics::default()
        };
        let mut partial = false;

        for outcome in outcomes {
            match outcome {
                FileOutcome::Analyzed {
                    analysis,
                    from_cache,
                    rel_path,
                    content,
                } => {
                    metrics.files_analyzed += 1;
                    metrics.total_loc += analysis.loc;
                    if from_cache {
                        metrics.files_from_cache += 1;
                    }
                    violations.extend(analysis.violations.iter().cloned());
                    for (rule, tally) in &analysis.rule_tallies {
                        rule_tallies.entry(*rule).or_default().merge(*tally);
                    }
                    fingerprints.push(analysis.fingerprints.clone());
                    diagnostics.extend(analysis.diagnostics.iter().cloned());
                    current_files.push(rel_path.clone());
                    if let Some(cache) = cache.as_mut() {
                        if !from_cache {
                            cache.insert(rel_path, &content, analysis);
                        }
                    }
                }
                FileOutcome::Skipped(diagnostic) => {
                    metrics.files_skipped += 1;
                    diagnostics.push(diagnostic);
                }
                FileOutcome::NotRun(diagnostic) => {
                    partial = true;
                    diagnostics.push(diagnostic);
                }
            }
        }

        if let (Some(root), Some(cache)) = (project_root, cache.as_mut()) {
            // A partial run has not seen every file, so it cannot tell
            // removed files from skipped ones.
            if !partial {
                cache.prune(&current_files);
            }
            if let Err(e) = cache.save(root) {
                tracing::warn!("failed to save analysis cache: {e:#}");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::CacheError,
                    format!("failed to save analysis cache: {e:#}"),
                ));
            }
        }

        let duplication = FingerprintIndex::new(fingerprints).cluster(&self.config.duplication);

        metrics.pool = pool
            .all_stats()
            .into_iter()
            .map(|(kind, stats)| (kind.as_str().to_string(), stats))
            .collect();
        metrics.analysis_time_ms = started.elapsed().as_millis() as u64;

        aggregate::aggregate(AggregateInput {
            policy: &policy,
            scoring: &self.config.scoring,
            rule_weights: &self.config.rules.weights,
            violations,
            rule_tallies,
            duplication,
            diagnostics,
            partial,
            metrics,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn process(
        &self,
        path: &Path,
        adapter: &dyn LanguageAdapter,
        pool: &DetectorPool,
        token: &CancellationToken,
        deadline: Option<Instant>,
        project_root: Option<&Path>,
        cache: Option<&AnalysisCache>,
    ) -> FileOutcome {
        if token.is_cancelled() {
            return FileOutcome::NotRun(
                Diagnostic::new(DiagnosticKind::Cancelled, "analysis cancelled before file")
                    .for_path(path),
            );
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return FileOutcome::NotRun(
                Diagnostic::new(DiagnosticKind::Timeout, "run timeout elapsed before file")
                    .for_path(path),
            );
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read: {e}");
                let err = AnalysisError::Io {
                    path: path.to_path_buf(),
                    source: e,
                };
                return FileOutcome::Skipped(
                    Diagnostic::new(DiagnosticKind::ReadError, err.to_string()).for_path(path),
                );
            }
        };

        let rel_path = project_root
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if let Some(cached) = cache.and_then(|c| c.get(&rel_path, &content)) {
            tracing::debug!(path = %path.display(), "using cached result");
            return FileOutcome::Analyzed {
                analysis: cached.clone(),
                from_cache: true,
                rel_path,
                content,
            };
        }

        let unit = match adapter.parse(path, &content) {
            Ok(unit) => unit,
            Err(e) => {
                tracing::warn!(path = %path.display(), "{e}");
                return FileOutcome::Skipped(
                    Diagnostic::new(DiagnosticKind::ParseError, e.to_string()).for_path(path),
                );
            }
        };

        let analysis = self.analyze_unit(&unit, pool);
        tracing::debug!(
            path = %path.display(),
            violations = analysis.violations.len(),
            degraded = analysis.degraded,
            "analyzed file"
        );
        FileOutcome::Analyzed {
            analysis,
            from_cache: false,
            rel_path,
            content,
        }
    }

    /// Run every detector, the rule engine and the duplication map phase on
    /// one unit. Detector faults and pool exhaustion degrade the result
    /// instead of failing it.
    pub fn analyze_unit(&self, unit: &SourceUnit, pool: &DetectorPool) -> FileAnalysis {
        let mut analysis = FileAnalysis {
            path: unit.path.clone(),
            loc: unit.effective_loc(),
            ..FileAnalysis::default()
        };

        for kind in DetectorKind::ALL {
            let mut handle = match self.acquire(pool, kind) {
                Ok(handle) => handle,
                Err(e) => {
                    analysis.degraded = true;
                    analysis.diagnostics.push(
                        Diagnostic::new(DiagnosticKind::ResourceExhausted, e.to_string())
                            .for_path(&unit.path)
                            .for_detector(kind),
                    );
                    continue;
                }
            };
            match catch_unwind(AssertUnwindSafe(|| handle.analyze(unit))) {
                Ok(found) => analysis.violations.extend(found),
                Err(payload) => {
                    handle.mark_poisoned();
                    let err = AnalysisError::DetectorFault {
                        detector: kind,
                        path: unit.path.clone(),
                        message: panic_message(payload.as_ref()),
                    };
                    tracing::warn!("{err}");
                    analysis.degraded = true;
                    analysis.diagnostics.push(
                        Diagnostic::new(DiagnosticKind::DetectorFault, err.to_string())
                            .for_path(&unit.path)
                            .for_detector(kind),
                    );
                }
            }
        }

        match catch_unwind(AssertUnwindSafe(|| self.rules.check(unit))) {
            Ok(outcome) => {
                analysis.violations.extend(outcome.violations);
                analysis.rule_tallies = outcome.tallies;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(path = %unit.path.display(), "rule engine faulted: {message}");
                analysis.degraded = true;
                analysis.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::DetectorFault,
                        format!("rule engine faulted: {message}"),
                    )
                    .for_path(&unit.path)
                    .for_detector("rules"),
                );
            }
        }

        match catch_unwind(AssertUnwindSafe(|| self.duplication.fingerprint(unit))) {
            Ok(fingerprints) => analysis.fingerprints = fingerprints,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(path = %unit.path.display(), "fingerprinting faulted: {message}");
                analysis.degraded = true;
                analysis.fingerprints = FileFingerprints {
                    path: unit.path.clone(),
                    total_loc: analysis.loc,
                    blocks: Vec::new(),
                };
                analysis.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::DetectorFault,
                        format!("fingerprinting faulted: {message}"),
                    )
                    .for_path(&unit.path)
                    .for_detector("duplication"),
                );
            }
        }
        analysis
    }

    fn acquire<'p>(
        &self,
        pool: &'p DetectorPool,
        kind: DetectorKind,
    ) -> Result<crate::pool::PooledDetector<'p>, AnalysisError> {
        let mut attempt = 0;
        loop {
            match pool.acquire(kind) {
                Ok(handle) => return Ok(handle),
                Err(e) if attempt >= self.config.pool.acquire_retries => return Err(e),
                Err(_) => attempt += 1,
            }
        }
    }

    /// Expand directories, drop duplicates (first occurrence wins) and pair
    /// every file with the adapter that handles it.
    fn collect_files(
        &self,
        paths: &[PathBuf],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<(PathBuf, usize)> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for path in paths {
            if path.is_dir() {
                let walker = WalkDir::new(path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_entry(|e| !self.is_excluded(path, e.path()));
                for entry in walker.filter_map(|e| e.ok()) {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let file = entry.into_path();
                    if let Some(index) = self.adapter_for(&file) {
                        if seen.insert(file.clone()) {
                            files.push((file, index));
                        }
                    }
                }
            } else if !path.exists() {
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::ReadError, "path does not exist").for_path(path),
                );
            } else if let Some(index) = self.adapter_for(path) {
                if seen.insert(path.clone()) {
                    files.push((path.clone(), index));
                }
            } else if seen.insert(path.clone()) {
                tracing::debug!(path = %path.display(), "no adapter for file");
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::UnsupportedFile, "no language adapter for file")
                        .for_path(path),
                );
            }
        }

        files
    }

    fn adapter_for(&self, path: &Path) -> Option<usize> {
        self.adapters.iter().position(|a| a.handles(path))
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if path == root {
            return false;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.excludes.is_match(path) || self.excludes.is_match(relative)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, AnalysisError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            AnalysisError::Configuration(format!("invalid exclude pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
        // `dir/**` should also exclude the directory itself so the walker
        // never descends into it.
        if let Some(dir) = pattern.strip_suffix("/**") {
            if let Ok(glob) = Glob::new(dir) {
                builder.add(glob);
            }
        }
    }
    builder
        .build()
        .map_err(|e| AnalysisError::Configuration(format!("invalid exclude patterns: {e}")))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "detector panicked".to_string()
    }
}

/// Walk up from `start` looking for `.connascence.toml` or `.git` to find the project root.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        if current.join(CONFIG_FILE).exists() || current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}
