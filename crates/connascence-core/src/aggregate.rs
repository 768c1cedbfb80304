//! Combines detector, rule and duplication results into one report and
//! evaluates the quality gate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ScoringConfig;
use crate::duplication::{DuplicationCluster, DuplicationResult};
use crate::policy::{FlatPolicy, Thresholds};
use crate::pool::PoolStats;
use crate::rules::{self, RuleCompliance, RuleId, RuleTally};
use crate::types::{Diagnostic, Severity, Violation, ViolationType};

/// Per-file penalty density at which the connascence score drops to 0.5.
const DENSITY_HALF_POINT: f64 = 10.0;

/// Violation counts and headline scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
    pub god_objects: usize,
    pub connascence_score: f64,
    pub duplication_score: f64,
    pub rule_compliance_score: f64,
    pub overall_quality_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheck {
    pub name: String,
    pub passed: bool,
    pub actual: f64,
    pub threshold: f64,
}

/// Pass/fail outcome against a policy's thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    pub passed: bool,
    pub checks: Vec<GateCheck>,
}

/// Values the gate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateInputs {
    pub god_objects: usize,
    pub duplication_score: f64,
    pub rule_compliance: f64,
    pub critical_violations: usize,
    pub quality_score: f64,
}

impl GateInputs {
    pub fn from_summary(summary: &Summary) -> Self {
        Self {
            god_objects: summary.god_objects,
            duplication_score: summary.duplication_score,
            rule_compliance: summary.rule_compliance_score,
            critical_violations: summary.critical,
            quality_score: summary.overall_quality_score,
        }
    }
}

/// Evaluate the gate. Pure: depends only on the inputs and thresholds.
pub fn evaluate_gate(inputs: &GateInputs, thresholds: &Thresholds) -> QualityGate {
    let mut checks = vec![
        GateCheck {
            name: "max_god_objects".to_string(),
            passed: inputs.god_objects <= thresholds.max_god_objects,
            actual: inputs.god_objects as f64,
            threshold: thresholds.max_god_objects as f64,
        },
        GateCheck {
            name: "min_duplication_score".to_string(),
            passed: inputs.duplication_score >= thresholds.min_duplication_score,
            actual: inputs.duplication_score,
            threshold: thresholds.min_duplication_score,
        },
        GateCheck {
            name: "min_rule_compliance".to_string(),
            passed: inputs.rule_compliance >= thresholds.min_rule_compliance,
            actual: inputs.rule_compliance,
            threshold: thresholds.min_rule_compliance,
        },
        GateCheck {
            name: "max_critical_violations".to_string(),
            passed: inputs.critical_violations <= thresholds.max_critical_violations,
            actual: inputs.critical_violations as f64,
            threshold: thresholds.max_critical_violations as f64,
        },
    ];
    if let Some(min_quality) = thresholds.min_quality_score {
        checks.push(GateCheck {
            name: "min_quality_score".to_string(),
            passed: inputs.quality_score >= min_quality,
            actual: inputs.quality_score,
            threshold: min_quality,
        });
    }

    QualityGate {
        passed: checks.iter().all(|c| c.passed),
        checks,
    }
}

/// Run bookkeeping. Excluded from [`AnalysisReport::content_digest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub analysis_time_ms: u64,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub files_from_cache: usize,
    pub total_loc: usize,
    pub timestamp: DateTime<Utc>,
    pub pool: BTreeMap<String, PoolStats>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self {
            analysis_time_ms: 0,
            files_analyzed: 0,
            files_skipped: 0,
            files_from_cache: 0,
            total_loc: 0,
            timestamp: Utc::now(),
            pool: BTreeMap::new(),
        }
    }
}

/// The single output of an analysis run. Built once by [`aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    success: bool,
    policy: String,
    partial: bool,
    violations: Vec<Violation>,
    duplication_clusters: Vec<DuplicationCluster>,
    rule_compliance: RuleCompliance,
    summary: Summary,
    gate: QualityGate,
    metrics: RunMetrics,
    diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    /// The run completed. Gate failures and recovered errors do not clear it.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Some files were not analyzed because of cancellation or timeout.
    pub fn partial(&self) -> bool {
        self.partial
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn duplication_clusters(&self) -> &[DuplicationCluster] {
        &self.duplication_clusters
    }

    pub fn rule_compliance(&self) -> &RuleCompliance {
        &self.rule_compliance
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn passed(&self) -> bool {
        self.gate.passed
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Digest of everything except run metrics, for comparing reports of
    /// unchanged inputs.
    pub fn content_digest(&self) -> String {
        let content = (
            self.success,
            &self.policy,
            self.partial,
            &self.violations,
            &self.duplication_clusters,
            &self.rule_compliance,
            &self.summary,
            &self.gate,
            &self.diagnostics,
        );
        let encoded = serde_json::to_string(&content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Everything the aggregator combines.
#[derive(Debug, Clone)]
pub struct AggregateInput<'a> {
    pub policy: &'a FlatPolicy,
    pub scoring: &'a ScoringConfig,
    pub rule_weights: &'a BTreeMap<String, f64>,
    /// Unweighted detector and rule violations from every file.
    pub violations: Vec<Violation>,
    pub rule_tallies: BTreeMap<RuleId, RuleTally>,
    pub duplication: DuplicationResult,
    pub diagnostics: Vec<Diagnostic>,
    pub partial: bool,
    pub metrics: RunMetrics,
}

/// Penalty-per-LOC score in (0, 1]; no violations scores 1.
pub fn connascence_score(weighted_penalty: f64, total_loc: usize) -> f64 {
    let density = weighted_penalty * 100.0 / total_loc.max(1) as f64;
    1.0 / (1.0 + density / DENSITY_HALF_POINT)
}

/// Weighted mean of the three component scores, with weights normalized by
/// their sum.
pub fn overall_quality(
    scoring: &ScoringConfig,
    connascence: f64,
    compliance: f64,
    duplication: f64,
) -> f64 {
    let weights = [
        scoring.connascence_weight,
        scoring.compliance_weight,
        scoring.duplication_weight,
    ];
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return ((connascence + compliance + duplication) / 3.0).clamp(0.0, 1.0);
    }
    let weighted = weights[0] * connascence + weights[1] * compliance + weights[2] * duplication;
    (weighted / total).clamp(0.0, 1.0)
}

/// Severity descending, then path, line, column, rule and id.
pub fn sort_violations(violations: &mut [Violation]) {
    violations.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.location.file.cmp(&b.location.file))
            .then_with(|| a.location.line.cmp(&b.location.line))
            .then_with(|| a.location.column.cmp(&b.location.column))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn aggregate(input: AggregateInput<'_>) -> AnalysisReport {
    let AggregateInput {
        policy,
        scoring,
        rule_weights,
        violations,
        rule_tallies,
        duplication,
        mut diagnostics,
        partial,
        metrics,
    } = input;

    let mut violations: Vec<Violation> = violations
        .iter()
        .map(|v| v.weighted(policy.weight_for(v.kind)))
        .collect();
    sort_violations(&mut violations);
    violations.dedup_by(|a, b| a.id == b.id);

    let count = |s: Severity| violations.iter().filter(|v| v.severity == s).count();
    let penalty: f64 = violations
        .iter()
        .filter(|v| v.kind.is_connascence())
        .map(Violation::weighted_penalty)
        .sum();

    let rule_compliance: RuleCompliance = rules::compliance(&rule_tallies, rule_weights);
    let connascence = connascence_score(penalty, metrics.total_loc);
    let quality = overall_quality(
        scoring,
        connascence,
        rule_compliance.score,
        duplication.score,
    );

    let summary = Summary {
        critical: count(Severity::Critical),
        high: count(Severity::High),
        medium: count(Severity::Medium),
        low: count(Severity::Low),
        total: violations.len(),
        god_objects: violations
            .iter()
            .filter(|v| v.kind == ViolationType::GodObject)
            .count(),
        connascence_score: connascence,
        duplication_score: duplication.score,
        rule_compliance_score: rule_compliance.score,
        overall_quality_score: quality,
    };
    let gate = evaluate_gate(&GateInputs::from_summary(&summary), &policy.thresholds);

    diagnostics.sort();
    diagnostics.dedup();

    tracing::info!(
        policy = %policy.name,
        violations = summary.total,
        critical = summary.critical,
        quality = summary.overall_quality_score,
        passed = gate.passed,
        partial,
        "analysis complete"
    );

    AnalysisReport {
        success: true,
        policy: policy.name.clone(),
        partial,
        violations,
        duplication_clusters: duplication.clusters,
        rule_compliance,
        summary,
        gate,
        metrics,
        diagnostics,
    }
}
