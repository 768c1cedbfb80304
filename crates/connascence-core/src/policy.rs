//! Named threshold/weight bundles.
//!
//! Policies may extend a base policy. The inheritance graph is flattened once
//! at load time with a topological sort, so resolving a policy afterwards is a
//! map lookup and never walks a chain.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::types::{Diagnostic, DiagnosticKind, ViolationType};

pub const DEFAULT_POLICY: &str = "standard";

/// Deprecated or legacy names mapped to their canonical policy.
const ALIASES: &[(&str, &str)] = &[
    ("default", "standard"),
    ("service-defaults", "standard"),
    ("strict-core", "strict"),
    ("experimental", "lenient"),
    ("nasa_jpl_pot10", "nasa-compliance"),
    ("nasa", "nasa-compliance"),
];

/// Threshold values a policy may set; unset values inherit from the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_god_objects: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duplication_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rule_compliance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_critical_violations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality_score: Option<f64>,
}

/// A policy as declared, before inheritance is flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub thresholds: ThresholdOverrides,
}

/// Fully resolved gate thresholds. Compliance and scores are fractions in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_god_objects: usize,
    pub min_duplication_score: f64,
    pub min_rule_compliance: f64,
    pub max_critical_violations: usize,
    pub min_quality_score: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_god_objects: 3,
            min_duplication_score: 0.75,
            min_rule_compliance: 0.75,
            max_critical_violations: 0,
            min_quality_score: None,
        }
    }
}

impl Thresholds {
    fn apply(&mut self, overrides: &ThresholdOverrides) {
        if let Some(v) = overrides.max_god_objects {
            self.max_god_objects = v;
        }
        if let Some(v) = overrides.min_duplication_score {
            self.min_duplication_score = v;
        }
        if let Some(v) = overrides.min_rule_compliance {
            self.min_rule_compliance = v;
        }
        if let Some(v) = overrides.max_critical_violations {
            self.max_critical_violations = v;
        }
        if let Some(v) = overrides.min_quality_score {
            self.min_quality_score = Some(v);
        }
    }
}

/// A policy with inheritance already merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatPolicy {
    pub name: String,
    pub description: String,
    /// Weight per violation type key; types absent here weigh 1.0.
    pub weights: BTreeMap<String, f64>,
    pub thresholds: Thresholds,
    /// Root-first inheritance chain ending with this policy.
    pub lineage: Vec<String>,
}

impl FlatPolicy {
    pub fn weight_for(&self, kind: ViolationType) -> f64 {
        self.weights.get(kind.as_str()).copied().unwrap_or(1.0)
    }

    /// Copy with request-level threshold overrides applied.
    pub fn with_overrides(&self, overrides: &ThresholdOverrides) -> FlatPolicy {
        let mut policy = self.clone();
        policy.thresholds.apply(overrides);
        policy
    }
}

/// Outcome of resolving a requested policy name.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub requested: String,
    pub policy: FlatPolicy,
    pub warning: Option<Diagnostic>,
}

/// Read-only table of flattened policies, safe to share across workers.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, FlatPolicy>,
    aliases: BTreeMap<String, String>,
}

impl PolicyRegistry {
    /// Built-in policies only.
    pub fn builtin() -> Result<Self, AnalysisError> {
        Self::load(&[])
    }

    /// Built-ins plus `specs`; a spec with a built-in name replaces it.
    pub fn load(specs: &[PolicySpec]) -> Result<Self, AnalysisError> {
        let mut by_name: BTreeMap<String, PolicySpec> = builtin_specs()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        let mut seen = std::collections::HashSet::new();
        for spec in specs {
            let name = normalize(&spec.name);
            if name.is_empty() {
                return Err(AnalysisError::Configuration(
                    "policy name must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(AnalysisError::Configuration(format!(
                    "policy '{name}' is declared more than once"
                )));
            }
            let mut spec = spec.clone();
            spec.name = name.clone();
            spec.base = spec.base.as_deref().map(normalize);
            by_name.insert(name, spec);
        }

        for spec in by_name.values() {
            validate_spec(spec)?;
        }

        let policies = flatten(&by_name)?;
        let aliases = ALIASES
            .iter()
            .filter(|(alias, _)| !policies.contains_key(*alias))
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect();

        Ok(Self { policies, aliases })
    }

    /// Resolve `name`, falling back to the default policy with a warning
    /// when the name is unknown.
    pub fn resolve(&self, name: &str) -> Resolution {
        let requested = normalize(name);

        if let Some(policy) = self.policies.get(&requested) {
            return Resolution {
                requested,
                policy: policy.clone(),
                warning: None,
            };
        }

        if let Some(canonical) = self.aliases.get(&requested) {
            if let Some(policy) = self.policies.get(canonical) {
                let message = format!(
                    "policy name '{requested}' is deprecated; use '{canonical}' instead"
                );
                tracing::warn!("{message}");
                return Resolution {
                    requested,
                    policy: policy.clone(),
                    warning: Some(Diagnostic::new(DiagnosticKind::PolicyFallback, message)),
                };
            }
        }

        let message = format!(
            "unknown policy '{requested}'; falling back to '{DEFAULT_POLICY}'"
        );
        tracing::warn!("{message}");
        let policy = self
            .policies
            .get(DEFAULT_POLICY)
            .cloned()
            .unwrap_or_else(standard_fallback);
        Resolution {
            requested,
            policy,
            warning: Some(Diagnostic::new(DiagnosticKind::PolicyFallback, message)),
        }
    }

    /// Canonical policy name for a name or alias, if any.
    pub fn resolve_policy_name(&self, alias: &str) -> Option<&str> {
        let key = normalize(alias);
        if let Some((name, _)) = self.policies.get_key_value(&key) {
            return Some(name.as_str());
        }
        self.aliases
            .get(&key)
            .and_then(|c| self.policies.get_key_value(c))
            .map(|(name, _)| name.as_str())
    }

    pub fn validate_policy_name(&self, name: &str) -> bool {
        self.resolve_policy_name(name).is_some()
    }

    pub fn list_available_policies(&self) -> Vec<&str> {
        self.policies.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&FlatPolicy> {
        self.policies.get(&normalize(name))
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn validate_spec(spec: &PolicySpec) -> Result<(), AnalysisError> {
    for (key, weight) in &spec.weights {
        if key.parse::<ViolationType>().is_err() {
            return Err(AnalysisError::Configuration(format!(
                "policy '{}' weights unknown violation type '{key}'",
                spec.name
            )));
        }
        if !weight.is_finite() || *weight < 0.0 {
            return Err(AnalysisError::Configuration(format!(
                "policy '{}' weight for '{key}' must be a non-negative number",
                spec.name
            )));
        }
    }
    let t = &spec.thresholds;
    for (label, value) in [
        ("min_duplication_score", t.min_duplication_score),
        ("min_rule_compliance", t.min_rule_compliance),
        ("min_quality_score", t.min_quality_score),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(AnalysisError::Configuration(format!(
                    "policy '{}' {label} must be within [0, 1], got {v}",
                    spec.name
                )));
            }
        }
    }
    Ok(())
}

/// Topologically flatten inheritance into plain policies.
fn flatten(
    specs: &BTreeMap<String, PolicySpec>,
) -> Result<BTreeMap<String, FlatPolicy>, AnalysisError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for name in specs.keys() {
        index.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    for spec in specs.values() {
        if let Some(base) = spec.base.as_deref() {
            let Some(&base_idx) = index.get(base) else {
                return Err(AnalysisError::UnknownPolicyBase {
                    policy: spec.name.clone(),
                    base: base.to_string(),
                });
            };
            graph.add_edge(base_idx, index[spec.name.as_str()], ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| AnalysisError::CyclicPolicy {
        cycle: describe_cycle(specs, graph[cycle.node_id()]),
    })?;

    let mut flat: BTreeMap<String, FlatPolicy> = BTreeMap::new();
    for idx in order {
        let spec = &specs[graph[idx]];
        let mut policy = match spec.base.as_deref().and_then(|b| flat.get(b)) {
            Some(base) => base.clone(),
            None => FlatPolicy {
                name: String::new(),
                description: String::new(),
                weights: BTreeMap::new(),
                thresholds: Thresholds::default(),
                lineage: Vec::new(),
            },
        };
        policy.name = spec.name.clone();
        if let Some(description) = &spec.description {
            policy.description = description.clone();
        }
        for (key, weight) in &spec.weights {
            policy.weights.insert(key.clone(), *weight);
        }
        policy.thresholds.apply(&spec.thresholds);
        policy.lineage.push(spec.name.clone());
        flat.insert(spec.name.clone(), policy);
    }
    Ok(flat)
}

/// Follow base links from `start` until a name repeats.
fn describe_cycle(specs: &BTreeMap<String, PolicySpec>, start: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut current = Some(start.to_string());
    while let Some(name) = current {
        if let Some(pos) = chain.iter().position(|n| *n == name) {
            let mut cycle = chain.split_off(pos);
            cycle.push(name);
            return cycle;
        }
        current = specs.get(&name).and_then(|s| s.base.clone());
        chain.push(name);
    }
    chain
}

fn standard_fallback() -> FlatPolicy {
    FlatPolicy {
        name: DEFAULT_POLICY.to_string(),
        description: String::new(),
        weights: BTreeMap::new(),
        thresholds: Thresholds::default(),
        lineage: vec![DEFAULT_POLICY.to_string()],
    }
}

fn weights(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn builtin_specs() -> Vec<PolicySpec> {
    vec![
        PolicySpec {
            name: "standard".to_string(),
            base: None,
            description: Some("Balanced gate for everyday development".to_string()),
            weights: weights(&[
                ("position", 1.0),
                ("meaning", 1.0),
                ("algorithm", 1.5),
                ("god_object", 2.0),
                ("timing", 1.5),
                ("convention", 1.0),
                ("values", 1.5),
                ("execution", 1.0),
                ("safety_rule", 1.0),
            ]),
            thresholds: ThresholdOverrides {
                max_god_objects: Some(3),
                min_duplication_score: Some(0.75),
                min_rule_compliance: Some(0.75),
                max_critical_violations: Some(0),
                min_quality_score: None,
            },
        },
        PolicySpec {
            name: "strict".to_string(),
            base: Some("standard".to_string()),
            description: Some("No god objects and high compliance".to_string()),
            weights: weights(&[("god_object", 3.0), ("timing", 2.0), ("values", 2.0)]),
            thresholds: ThresholdOverrides {
                max_god_objects: Some(0),
                min_duplication_score: Some(0.85),
                min_rule_compliance: Some(0.9),
                max_critical_violations: Some(0),
                min_quality_score: Some(0.7),
            },
        },
        PolicySpec {
            name: "lenient".to_string(),
            base: Some("standard".to_string()),
            description: Some("Gate for legacy or exploratory code".to_string()),
            weights: weights(&[("meaning", 0.5), ("convention", 0.5), ("position", 0.75)]),
            thresholds: ThresholdOverrides {
                max_god_objects: Some(10),
                min_duplication_score: Some(0.5),
                min_rule_compliance: Some(0.5),
                max_critical_violations: Some(5),
                min_quality_score: None,
            },
        },
        PolicySpec {
            name: "nasa-compliance".to_string(),
            base: Some("strict".to_string()),
            description: Some("Safety-rule focused gate".to_string()),
            weights: weights(&[("safety_rule", 2.0)]),
            thresholds: ThresholdOverrides {
                min_rule_compliance: Some(0.95),
                ..ThresholdOverrides::default()
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, base: Option<&str>) -> PolicySpec {
        PolicySpec {
            name: name.to_string(),
            base: base.map(str::to_string),
            description: None,
            weights: BTreeMap::new(),
            thresholds: ThresholdOverrides::default(),
        }
    }

    #[test]
    fn test_builtins_are_listed() {
        let registry = PolicyRegistry::builtin().unwrap();
        assert_eq!(
            registry.list_available_policies(),
            vec!["lenient", "nasa-compliance", "standard", "strict"]
        );
    }

    #[test]
    fn test_inheritance_merges_with_override_winning() {
        let registry = PolicyRegistry::builtin().unwrap();
        let nasa = registry.get("nasa-compliance").unwrap();
        assert_eq!(nasa.lineage, vec!["standard", "strict", "nasa-compliance"]);
        // from strict
        assert_eq!(nasa.thresholds.max_god_objects, 0);
        // own override
        assert!((nasa.thresholds.min_rule_compliance - 0.95).abs() < f64::EPSILON);
        assert!((nasa.weight_for(ViolationType::SafetyRule) - 2.0).abs() < f64::EPSILON);
        // inherited from standard
        assert!((nasa.weight_for(ViolationType::Algorithm) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolve_is_pure() {
        let registry = PolicyRegistry::builtin().unwrap();
        let a = registry.resolve("strict").policy;
        let b = registry.resolve("strict").policy;
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_policy_falls_back_with_warning() {
        let registry = PolicyRegistry::builtin().unwrap();
        let resolution = registry.resolve("foo");
        assert_eq!(resolution.policy.name, "standard");
        let warning = resolution.warning.expect("fallback should warn");
        assert_eq!(warning.kind, DiagnosticKind::PolicyFallback);
        assert!(warning.message.contains("foo"));
    }

    #[test]
    fn test_alias_resolves_with_deprecation_warning() {
        let registry = PolicyRegistry::builtin().unwrap();
        assert_eq!(registry.resolve_policy_name("nasa_jpl_pot10"), Some("nasa-compliance"));
        assert_eq!(registry.resolve_policy_name("Strict"), Some("strict"));
        assert_eq!(registry.resolve_policy_name("nope"), None);

        let resolution = registry.resolve("default");
        assert_eq!(resolution.policy.name, "standard");
        assert!(resolution.warning.unwrap().message.contains("deprecated"));
    }

    #[test]
    fn test_validate_policy_name() {
        let registry = PolicyRegistry::builtin().unwrap();
        assert!(registry.validate_policy_name("lenient"));
        assert!(registry.validate_policy_name("experimental"));
        assert!(!registry.validate_policy_name("foo"));
    }

    #[test]
    fn test_cycle_is_rejected_at_load() {
        let specs = vec![spec("a", Some("b")), spec("b", Some("c")), spec("c", Some("a"))];
        match PolicyRegistry::load(&specs) {
            Err(AnalysisError::CyclicPolicy { cycle }) => {
                assert_eq!(cycle.len(), 4);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_inheritance_is_a_cycle() {
        let specs = vec![spec("loop", Some("loop"))];
        assert!(matches!(
            PolicyRegistry::load(&specs),
            Err(AnalysisError::CyclicPolicy { .. })
        ));
    }

    #[test]
    fn test_missing_base_is_rejected() {
        let specs = vec![spec("team", Some("ghost"))];
        assert!(matches!(
            PolicyRegistry::load(&specs),
            Err(AnalysisError::UnknownPolicyBase { .. })
        ));
    }

    #[test]
    fn test_unknown_weight_key_is_rejected() {
        let mut team = spec("team", Some("standard"));
        team.weights.insert("vibes".to_string(), 1.0);
        assert!(matches!(
            PolicyRegistry::load(&[team]),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_custom_policy_extends_builtin() {
        let mut team = spec("Team", Some("strict"));
        team.thresholds.max_god_objects = Some(2);
        team.weights.insert("timing".to_string(), 4.0);
        let registry = PolicyRegistry::load(&[team]).unwrap();
        let flat = registry.get("team").unwrap();
        assert_eq!(flat.thresholds.max_god_objects, 2);
        assert!((flat.thresholds.min_rule_compliance - 0.9).abs() < f64::EPSILON);
        assert!((flat.weight_for(ViolationType::Timing) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_request_overrides_apply_after_resolution() {
        let registry = PolicyRegistry::builtin().unwrap();
        let base = registry.resolve("standard").policy;
        let tightened = base.with_overrides(&ThresholdOverrides {
            max_god_objects: Some(0),
            ..ThresholdOverrides::default()
        });
        assert_eq!(tightened.thresholds.max_god_objects, 0);
        assert_eq!(base.thresholds.max_god_objects, 3);
    }
}
