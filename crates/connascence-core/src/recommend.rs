//! Refactoring suggestions for violations. Pure mapping, no side effects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Violation, ViolationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub technique: String,
    pub rationale: String,
    /// 1 is the first thing to try.
    pub priority: u8,
    pub effort: Effort,
}

impl Recommendation {
    fn new(priority: u8, technique: &str, effort: Effort, rationale: impl Into<String>) -> Self {
        Self {
            technique: technique.to_string(),
            rationale: rationale.into(),
            priority,
            effort,
        }
    }
}

/// Recommendations for every violation of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationGroup {
    pub kind: ViolationType,
    pub occurrences: usize,
    pub total_weighted_penalty: f64,
    pub recommendations: Vec<Recommendation>,
}

/// Parameter count above which grouping beats keyword-only arguments.
const PARAMETER_OBJECT_THRESHOLD: f64 = 6.0;

/// Ranked suggestions for one violation.
pub fn recommend(violation: &Violation) -> Vec<Recommendation> {
    let mut out = match violation.kind {
        ViolationType::Position => position(violation),
        ViolationType::Meaning => meaning(violation),
        ViolationType::Algorithm => vec![
            Recommendation::new(
                1,
                "Extract Method",
                Effort::Medium,
                "Move the shared control flow into one function and pass the varying steps in",
            ),
            Recommendation::new(
                2,
                "Template Method",
                Effort::Large,
                "When the copies live in related classes, hoist the skeleton into a base class",
            ),
        ],
        ViolationType::GodObject => god_object(violation),
        ViolationType::Timing => vec![
            Recommendation::new(
                1,
                "Replace Sleep with Synchronization",
                Effort::Medium,
                "Wait on an event, condition or future that signals the state you need",
            ),
            Recommendation::new(
                2,
                "Inject Clock",
                Effort::Small,
                "Pass time in as a dependency so ordering can be controlled in tests",
            ),
        ],
        ViolationType::Convention => vec![
            Recommendation::new(
                1,
                "Replace String Keys with Enum",
                Effort::Medium,
                "An enum makes the accepted keys explicit and checkable",
            ),
            Recommendation::new(
                2,
                "Replace Conditional with Polymorphism",
                Effort::Large,
                "Register handlers on a typed table instead of branching on strings",
            ),
            Recommendation::new(
                3,
                "Document the Protocol",
                Effort::Small,
                "At minimum, a docstring listing valid keys removes the hidden agreement",
            ),
        ],
        ViolationType::Values => vec![
            Recommendation::new(
                1,
                "Use None Default",
                Effort::Small,
                "Default to None and build a fresh value inside the function",
            ),
            Recommendation::new(
                2,
                "Freeze Shared Constant",
                Effort::Small,
                "Use a tuple, frozenset or MappingProxyType for values every importer shares",
            ),
        ],
        ViolationType::Execution => vec![
            Recommendation::new(
                1,
                "Introduce Explicit Initialization",
                Effort::Medium,
                "Move import-time side effects into a function the entry point calls",
            ),
            Recommendation::new(
                2,
                "Guard with __main__",
                Effort::Small,
                "Script behaviour belongs under `if __name__ == \"__main__\":`",
            ),
        ],
        ViolationType::SafetyRule => safety_rule(violation),
    };
    out.sort_by_key(|r| r.priority);
    out
}

fn position(violation: &Violation) -> Vec<Recommendation> {
    let count = violation.metric("parameter_count").unwrap_or(0.0);
    let parameter_object = Recommendation::new(
        1,
        "Introduce Parameter Object",
        Effort::Medium,
        "Group parameters that travel together into a dataclass",
    );
    let keyword_only = Recommendation::new(
        1,
        "Use Keyword-Only Arguments",
        Effort::Small,
        "A bare `*` in the signature makes callers name each argument",
    );
    if count > PARAMETER_OBJECT_THRESHOLD {
        vec![parameter_object, Recommendation { priority: 2, ..keyword_only }]
    } else {
        vec![keyword_only, Recommendation { priority: 2, ..parameter_object }]
    }
}

fn meaning(violation: &Violation) -> Vec<Recommendation> {
    let is_string = violation.metric("is_string").unwrap_or(0.0) > 0.0;
    let mut out = vec![Recommendation::new(
        1,
        "Replace Magic Literal with Named Constant",
        Effort::Small,
        "A name states what the value means and gives one place to change it",
    )];
    if is_string {
        out.push(Recommendation::new(
            2,
            "Replace String with Enum",
            Effort::Medium,
            "String tags compared in several places are an implicit enumeration",
        ));
    }
    out
}

fn god_object(violation: &Violation) -> Vec<Recommendation> {
    let methods = violation.metric("method_count").unwrap_or(0.0);
    let loc = violation.metric("loc").unwrap_or(0.0);
    let effort = if methods > 40.0 || loc > 1000.0 {
        Effort::Large
    } else {
        Effort::Medium
    };
    vec![
        Recommendation::new(
            1,
            "Extract Class + Facade",
            effort,
            format!(
                "{methods:.0} methods over {loc:.0} lines; split cohesive groups into classes and keep the old interface as a facade"
            ),
        ),
        Recommendation::new(
            2,
            "Move Method",
            Effort::Small,
            "Methods that mostly use another object's data belong on that object",
        ),
    ]
}

fn safety_rule(violation: &Violation) -> Vec<Recommendation> {
    let (technique, effort, rationale) = match violation.rule_id.as_str() {
        "bounded_loops" => (
            "Bound the Loop",
            Effort::Small,
            "Iterate over a finite range or add a counter-based exit; turn recursion into iteration",
        ),
        "function_size" => (
            "Extract Method",
            Effort::Medium,
            "Split the function along its comment-delimited or indentation-delimited steps",
        ),
        "assertion_density" => (
            "Add Precondition Checks",
            Effort::Small,
            "Assert inputs and invariants so failures surface where they start",
        ),
        "return_value_checks" => (
            "Use or Remove the Call",
            Effort::Small,
            "A discarded pure result is either a bug or dead code",
        ),
        "restricted_references" => (
            "Remove Identity Tricks",
            Effort::Medium,
            "Compare values rather than identities and avoid raw memory access",
        ),
        "restricted_allocation" => (
            "Hoist Allocation",
            Effort::Small,
            "Allocate once outside the loop and reuse or clear it",
        ),
        "minimal_scope" => (
            "Return Instead of Rebinding",
            Effort::Small,
            "Return the new value or keep the state on an object",
        ),
        "limited_metaprogramming" => (
            "Make Imports Explicit",
            Effort::Small,
            "Name what you import and reduce decorator stacking",
        ),
        "restricted_indirection" => (
            "Hide Delegate",
            Effort::Medium,
            "Ask the nearest collaborator instead of walking its internals; never eval input",
        ),
        _ => (
            "Fix the Warning",
            Effort::Small,
            "Resolve the underlying warning instead of silencing it",
        ),
    };
    vec![Recommendation::new(1, technique, effort, rationale)]
}

/// Recommendations grouped by violation type, most costly group first.
pub fn summarize(violations: &[Violation]) -> Vec<RecommendationGroup> {
    let mut groups: BTreeMap<ViolationType, (usize, f64, Option<&Violation>)> = BTreeMap::new();
    for v in violations {
        let entry = groups.entry(v.kind).or_insert((0, 0.0, None));
        entry.0 += 1;
        entry.1 += v.weighted_penalty();
        // The heaviest violation of the type drives the suggestions.
        let heavier = entry
            .2
            .map(|current| v.weighted_penalty() > current.weighted_penalty())
            .unwrap_or(true);
        if heavier {
            entry.2 = Some(v);
        }
    }

    let mut out: Vec<RecommendationGroup> = groups
        .into_iter()
        .filter_map(|(kind, (occurrences, total, sample))| {
            Some(RecommendationGroup {
                kind,
                occurrences,
                total_weighted_penalty: total,
                recommendations: recommend(sample?),
            })
        })
        .collect();
    out.sort_by(|a, b| {
        b.total_weighted_penalty
            .total_cmp(&a.total_weighted_penalty)
            .then_with(|| a.kind.cmp(&b.kind))
    });
    out
}
