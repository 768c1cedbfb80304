/// Safety rules on real Python source.
use std::path::Path;

use connascence::rules::RuleOutcome;
use connascence::{LanguageAdapter, PythonAdapter, RuleEngine, RuleId, RulesConfig, Severity};

fn check(source: &str) -> RuleOutcome {
    let unit = PythonAdapter::new()
        .unwrap()
        .parse(Path::new("rules.py"), source)
        .unwrap();
    RuleEngine::new(&RulesConfig::default()).unwrap().check(&unit)
}

fn findings(outcome: &RuleOutcome, rule: RuleId) -> Vec<(usize, Severity)> {
    outcome
        .violations
        .iter()
        .filter(|v| v.rule_id == rule.as_str())
        .map(|v| (v.location.line, v.severity))
        .collect()
}

#[test]
fn no_loops_means_full_bounded_loop_compliance() {
    let outcome = check("def add(a, b):\n    return a + b\n");
    let tally = outcome.tallies[&RuleId::BoundedLoops];
    assert_eq!(tally.violating, 0);
    assert_eq!(tally.compliance(), 1.0);
}

#[test]
fn infinite_loop_without_exit_is_critical() {
    let source = r#"
def serve(queue):
    while True:
        queue.get()

def worker(queue):
    while True:
        item = queue.get()
        if item is None:
            break
"#;
    let outcome = check(source);
    assert_eq!(
        findings(&outcome, RuleId::BoundedLoops),
        vec![(3, Severity::Critical)]
    );
    let tally = outcome.tallies[&RuleId::BoundedLoops];
    assert_eq!((tally.eligible, tally.violating), (2, 1));
}

#[test]
fn itertools_count_is_unbounded() {
    let outcome = check("import itertools\n\ndef spin():\n    for i in itertools.count():\n        print(i)\n");
    assert_eq!(findings(&outcome, RuleId::BoundedLoops).len(), 1);
}

#[test]
fn recursion_is_reported() {
    let outcome = check("def fact(n):\n    return 1 if n < 2 else n * fact(n - 1)\n");
    assert_eq!(
        findings(&outcome, RuleId::BoundedLoops),
        vec![(1, Severity::High)]
    );
    // Recursion is not a loop: the rule has nothing to score.
    let tally = outcome.tallies[&RuleId::BoundedLoops];
    assert_eq!((tally.eligible, tally.violating), (0, 0));
    assert_eq!(tally.compliance(), 1.0);
}

#[test]
fn recursion_does_not_lower_loop_compliance() {
    let source = "def walk(node):\n    for child in node.children:\n        walk(child)\n";
    let outcome = check(source);
    assert_eq!(findings(&outcome, RuleId::BoundedLoops).len(), 1);
    let tally = outcome.tallies[&RuleId::BoundedLoops];
    assert_eq!((tally.eligible, tally.violating), (1, 0));
}

#[test]
fn long_functions_violate_function_size() {
    let mut source = String::from("def long():\n");
    for i in 0..70 {
        source.push_str(&format!("    x{i} = {i}\n"));
    }
    source.push_str("\ndef short():\n    return 1\n");
    let outcome = check(&source);
    assert_eq!(findings(&outcome, RuleId::FunctionSize).len(), 1);
    let tally = outcome.tallies[&RuleId::FunctionSize];
    assert_eq!((tally.eligible, tally.violating), (2, 1));
}

#[test]
fn discarded_pure_results_are_flagged() {
    let source = "def clean(name, items):\n    name.strip()\n    sorted(items)\n    items.append(name)\n";
    let outcome = check(source);
    assert_eq!(
        findings(&outcome, RuleId::ReturnValueChecks)
            .into_iter()
            .map(|(line, _)| line)
            .collect::<Vec<_>>(),
        vec![2, 3]
    );
    let tally = outcome.tallies[&RuleId::ReturnValueChecks];
    assert_eq!(tally.eligible, 3);
}

#[test]
fn eval_is_critical_indirection() {
    let outcome = check("def run(expr):\n    return eval(expr)\n");
    assert_eq!(
        findings(&outcome, RuleId::RestrictedIndirection),
        vec![(2, Severity::Critical)]
    );
}

#[test]
fn deep_attribute_chains_are_flagged_once() {
    let outcome = check("def owner(order):\n    return order.customer.account.owner.name\n");
    assert_eq!(findings(&outcome, RuleId::RestrictedIndirection).len(), 1);
}

#[test]
fn wildcard_imports_and_decorator_stacks() {
    let source = r#"
from os.path import *

@a
@b
@c
@d
def decorated():
    pass
"#;
    let outcome = check(source);
    assert_eq!(findings(&outcome, RuleId::LimitedMetaprogramming).len(), 2);
}

#[test]
fn global_rebinding_violates_minimal_scope() {
    let outcome = check("counter = 0\n\ndef bump():\n    global counter\n    counter += 1\n");
    assert_eq!(findings(&outcome, RuleId::MinimalScope).len(), 1);
}

#[test]
fn allocation_inside_loops() {
    let source = "def rows(data):\n    out = []\n    for d in data:\n        buf = []\n        buf.append(d)\n        out.append(buf)\n    return out\n";
    let outcome = check(source);
    assert_eq!(
        findings(&outcome, RuleId::RestrictedAllocation),
        vec![(3, Severity::Low)]
    );
}

#[test]
fn identity_calls_violate_restricted_references() {
    let outcome = check("def key(obj):\n    return id(obj)\n");
    assert_eq!(findings(&outcome, RuleId::RestrictedReferences).len(), 1);
}

#[test]
fn suppressions_and_bare_except_violate_zero_warnings() {
    let source = "def load(path):\n    try:\n        return open(path).read()  # noqa\n    except:\n        return None\n";
    let outcome = check(source);
    assert_eq!(findings(&outcome, RuleId::ZeroWarnings).len(), 2);
}

#[test]
fn every_rule_reports_a_tally() {
    let outcome = check("x = 1\n");
    for rule in RuleId::ALL {
        let tally = outcome.tallies[&rule];
        assert!(tally.violating <= tally.eligible, "{rule}");
    }
}
