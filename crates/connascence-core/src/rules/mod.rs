//! Fixed set of safety rules scored by compliance.
//!
//! Every rule defines which units it looks at (loops, functions, discarded
//! calls or scopes) and which of those units violate it. Compliance for a
//! rule is `1 - violating / eligible`, and a rule with nothing to look at is
//! fully compliant.

mod checks;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ast::{NodeId, SourceUnit};
use crate::config::RulesConfig;
use crate::error::AnalysisError;
use crate::types::{Severity, Violation, ViolationType};

/// Comment markers that silence linters or type checkers.
const BUILTIN_SUPPRESSIONS: &[&str] = &[
    r"#\s*noqa\b",
    r"type:\s*ignore",
    r"pylint:\s*disable",
    r"pyright:\s*ignore",
    r"mypy:\s*ignore-errors",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    BoundedLoops,
    FunctionSize,
    AssertionDensity,
    ReturnValueChecks,
    RestrictedReferences,
    RestrictedAllocation,
    MinimalScope,
    LimitedMetaprogramming,
    RestrictedIndirection,
    ZeroWarnings,
}

impl RuleId {
    pub const ALL: [RuleId; 10] = [
        RuleId::BoundedLoops,
        RuleId::FunctionSize,
        RuleId::AssertionDensity,
        RuleId::ReturnValueChecks,
        RuleId::RestrictedReferences,
        RuleId::RestrictedAllocation,
        RuleId::MinimalScope,
        RuleId::LimitedMetaprogramming,
        RuleId::RestrictedIndirection,
        RuleId::ZeroWarnings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::BoundedLoops => "bounded_loops",
            RuleId::FunctionSize => "function_size",
            RuleId::AssertionDensity => "assertion_density",
            RuleId::ReturnValueChecks => "return_value_checks",
            RuleId::RestrictedReferences => "restricted_references",
            RuleId::RestrictedAllocation => "restricted_allocation",
            RuleId::MinimalScope => "minimal_scope",
            RuleId::LimitedMetaprogramming => "limited_metaprogramming",
            RuleId::RestrictedIndirection => "restricted_indirection",
            RuleId::ZeroWarnings => "zero_warnings",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RuleId::BoundedLoops => "Loops have a provable bound and functions do not recurse",
            RuleId::FunctionSize => "Functions fit on one screen",
            RuleId::AssertionDensity => "Non-trivial functions check their assumptions",
            RuleId::ReturnValueChecks => "Results of pure or status-returning calls are used",
            RuleId::RestrictedReferences => "No raw pointer or object-identity tricks",
            RuleId::RestrictedAllocation => "No collection allocation inside loops",
            RuleId::MinimalScope => "Functions do not rebind outer variables",
            RuleId::LimitedMetaprogramming => "No wildcard or dynamic imports, few decorators",
            RuleId::RestrictedIndirection => "Shallow attribute chains and no eval/exec",
            RuleId::ZeroWarnings => "Warnings are fixed rather than silenced",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleId {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AnalysisError::Configuration(format!("unknown rule '{s}'")))
    }
}

/// Eligible and violating unit counts for one rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTally {
    pub eligible: usize,
    pub violating: usize,
}

impl RuleTally {
    pub fn compliance(&self) -> f64 {
        if self.eligible == 0 {
            return 1.0;
        }
        (1.0 - self.violating as f64 / self.eligible as f64).clamp(0.0, 1.0)
    }

    pub fn merge(&mut self, other: RuleTally) {
        self.eligible += other.eligible;
        self.violating += other.violating;
    }
}

/// Rule results for one source unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub violations: Vec<Violation>,
    pub tallies: BTreeMap<RuleId, RuleTally>,
}

impl RuleOutcome {
    pub fn merge(&mut self, other: &RuleOutcome) {
        self.violations.extend(other.violations.iter().cloned());
        for (rule, tally) in &other.tallies {
            self.tallies.entry(*rule).or_default().merge(*tally);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScore {
    pub compliance: f64,
    pub eligible: usize,
    pub violating: usize,
    pub weight: f64,
}

/// Per-rule compliance and their weighted mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCompliance {
    pub score: f64,
    pub per_rule: BTreeMap<String, RuleScore>,
}

/// Combine summed tallies into per-rule and overall compliance. Rules with
/// no configured weight weigh 1.0; if every weight is zero all rules weigh
/// the same.
pub fn compliance(
    tallies: &BTreeMap<RuleId, RuleTally>,
    weights: &BTreeMap<String, f64>,
) -> RuleCompliance {
    let mut per_rule = BTreeMap::new();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut plain_sum = 0.0;

    for rule in RuleId::ALL {
        let tally = tallies.get(&rule).copied().unwrap_or_default();
        let weight = weights.get(rule.as_str()).copied().unwrap_or(1.0);
        let value = tally.compliance();
        weighted_sum += weight * value;
        weight_total += weight;
        plain_sum += value;
        per_rule.insert(
            rule.as_str().to_string(),
            RuleScore {
                compliance: value,
                eligible: tally.eligible,
                violating: tally.violating,
                weight,
            },
        );
    }

    let score = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        plain_sum / RuleId::ALL.len() as f64
    };

    RuleCompliance {
        score: score.clamp(0.0, 1.0),
        per_rule,
    }
}

/// One unit's verdict as produced by a check.
pub(crate) struct Finding {
    /// The unit charged with the violation.
    pub unit: NodeId,
    pub at: NodeId,
    pub severity: Severity,
    pub description: String,
}

/// Runs the ten rules over a unit.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: RulesConfig,
    suppressions: Vec<Regex>,
}

impl RuleEngine {
    pub fn new(config: &RulesConfig) -> Result<Self, AnalysisError> {
        for key in config.weights.keys() {
            key.parse::<RuleId>()?;
        }
        let suppressions = BUILTIN_SUPPRESSIONS
            .iter()
            .map(|p| p.to_string())
            .chain(config.suppression_patterns.iter().cloned())
            .map(|p| {
                Regex::new(&p).map_err(|e| {
                    AnalysisError::Configuration(format!("invalid suppression pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config: config.clone(),
            suppressions,
        })
    }

    pub fn check(&self, unit: &SourceUnit) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        let mut seen_ids = BTreeSet::new();

        for rule in RuleId::ALL {
            let (eligible, mut findings) = self.run(rule, unit);
            let violating: BTreeSet<NodeId> = findings.iter().map(|f| f.unit).collect();
            outcome.tallies.insert(
                rule,
                RuleTally {
                    eligible: eligible.max(violating.len()),
                    violating: violating.len(),
                },
            );
            if rule == RuleId::BoundedLoops {
                findings.extend(checks::recursion(unit));
            }

            for finding in findings {
                let violation = Violation::new(
                    ViolationType::SafetyRule,
                    rule.as_str(),
                    finding.severity,
                    unit.location_of(finding.at),
                    finding.description,
                )
                .with_fix_hint(rule.description());
                if seen_ids.insert(violation.id.clone()) {
                    outcome.violations.push(violation);
                }
            }
        }

        outcome
    }

    fn run(&self, rule: RuleId, unit: &SourceUnit) -> (usize, Vec<Finding>) {
        let c = &self.config;
        match rule {
            RuleId::BoundedLoops => checks::bounded_loops(unit),
            RuleId::FunctionSize => checks::function_size(unit, c.max_function_loc),
            RuleId::AssertionDensity => {
                checks::assertion_density(unit, c.assertion_min_loc, c.min_assertions)
            }
            RuleId::ReturnValueChecks => checks::return_value_checks(unit),
            RuleId::RestrictedReferences => checks::restricted_references(unit),
            RuleId::RestrictedAllocation => checks::restricted_allocation(unit),
            RuleId::MinimalScope => checks::minimal_scope(unit),
            RuleId::LimitedMetaprogramming => {
                checks::limited_metaprogramming(unit, c.max_decorators)
            }
            RuleId::RestrictedIndirection => {
                checks::restricted_indirection(unit, c.max_attribute_depth)
            }
            RuleId::ZeroWarnings => checks::zero_warnings(unit, &self.suppressions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tallies(pairs: &[(RuleId, usize, usize)]) -> BTreeMap<RuleId, RuleTally> {
        pairs
            .iter()
            .map(|&(r, eligible, violating)| {
                (
                    r,
                    RuleTally {
                        eligible,
                        violating,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_zero_eligible_is_fully_compliant() {
        assert_eq!(RuleTally::default().compliance(), 1.0);
        let result = compliance(&BTreeMap::new(), &BTreeMap::new());
        assert_eq!(result.score, 1.0);
        assert_eq!(result.per_rule.len(), 10);
    }

    #[test]
    fn test_equal_weights_by_default() {
        let t = tallies(&[(RuleId::BoundedLoops, 4, 2), (RuleId::FunctionSize, 10, 10)]);
        let result = compliance(&t, &BTreeMap::new());
        assert_eq!(result.per_rule["bounded_loops"].compliance, 0.5);
        assert_eq!(result.per_rule["function_size"].compliance, 0.0);
        assert!((result.score - 8.5 / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_average() {
        let t = tallies(&[(RuleId::BoundedLoops, 2, 2)]);
        let mut weights = BTreeMap::new();
        weights.insert("bounded_loops".to_string(), 11.0);
        let result = compliance(&t, &weights);
        // 11 * 0.0 + 9 * 1.0 over 20
        assert!((result.score - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_equal() {
        let t = tallies(&[(RuleId::ZeroWarnings, 1, 1)]);
        let weights = RuleId::ALL
            .iter()
            .map(|r| (r.as_str().to_string(), 0.0))
            .collect();
        let result = compliance(&t, &weights);
        assert!((result.score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_weight_key_is_rejected() {
        let mut config = RulesConfig::default();
        config.weights.insert("no_goto".to_string(), 1.0);
        assert!(matches!(
            RuleEngine::new(&config),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_rule_id_round_trip_names() {
        for rule in RuleId::ALL {
            assert_eq!(rule.as_str().parse::<RuleId>().unwrap(), rule);
        }
    }
}
