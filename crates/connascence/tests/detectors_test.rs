/// Detector behaviour on real Python source.
use std::path::Path;

use connascence::{
    Detector, DetectorKind, DetectorsConfig, LanguageAdapter, PythonAdapter, Severity,
    SourceUnit, Violation,
};

fn parse(source: &str) -> SourceUnit {
    PythonAdapter::new()
        .unwrap()
        .parse(Path::new("sample.py"), source)
        .unwrap()
}

fn run(kind: DetectorKind, source: &str) -> Vec<Violation> {
    Detector::new(kind, &DetectorsConfig::default()).analyze(&parse(source))
}

#[test]
fn position_flags_long_positional_lists() {
    let violations = run(
        DetectorKind::Position,
        "def move(x, y, z, w):\n    pass\n\ndef ok(a, b, *, c, d):\n    pass\n",
    );
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "connascence_of_position");
    assert_eq!(violations[0].severity, Severity::Medium);
    assert_eq!(violations[0].metric("parameter_count"), Some(4.0));
    assert_eq!(violations[0].location.line, 1);
}

#[test]
fn position_ignores_self_on_methods() {
    let violations = run(
        DetectorKind::Position,
        "class P:\n    def set(self, a, b, c):\n        pass\n",
    );
    assert!(violations.is_empty(), "{violations:?}");
}

#[test]
fn position_escalates_at_twice_the_limit() {
    let violations = run(
        DetectorKind::Position,
        "def f(a, b, c, d, e, g):\n    pass\n",
    );
    assert_eq!(violations[0].severity, Severity::High);
}

#[test]
fn meaning_flags_magic_numbers_but_not_allowed_ones() {
    let violations = run(
        DetectorKind::Meaning,
        "def check(x):\n    if x == 42:\n        return 1\n    if x > 0:\n        return 0\n    return -1\n",
    );
    assert_eq!(violations.len(), 1);
    assert!(violations[0].description.contains("42"));
    assert_eq!(violations[0].location.line, 2);
}

#[test]
fn meaning_strings_are_low_severity() {
    let violations = run(
        DetectorKind::Meaning,
        "def route(kind):\n    return kind == \"admin\"\n",
    );
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, Severity::Low);
    assert_eq!(violations[0].metric("is_string"), Some(1.0));
}

#[test]
fn meaning_skips_main_guard_literal() {
    let violations = run(
        DetectorKind::Meaning,
        "if __name__ == \"__main__\":\n    pass\n",
    );
    assert!(violations.is_empty());
}

#[test]
fn algorithm_flags_repeated_control_flow() {
    let source = r#"
def first_positive(xs):
    for x in xs:
        if x > 0:
            return x
    return None

def first_named(items):
    for item in items:
        if item.name:
            return item
    return None
"#;
    let violations = run(DetectorKind::Algorithm, source);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].description.contains("first_named"));
    assert!(violations[0].description.contains("first_positive"));
}

#[test]
fn god_object_flags_classes_over_method_limit() {
    let mut source = String::from("class Everything:\n");
    for i in 0..25 {
        source.push_str(&format!("    def m{i}(self):\n        return {i}\n"));
    }
    source.push_str("\nclass Small:\n    def a(self):\n        pass\n");
    let violations = run(DetectorKind::Identity, &source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "god_object");
    assert_eq!(violations[0].metric("method_count"), Some(25.0));
}

#[test]
fn god_object_flags_oversized_modules() {
    let mut source = String::from("import os\n\n");
    for i in 0..30 {
        source.push_str(&format!("def helper_{i}(path):\n"));
        for j in 0..21 {
            source.push_str(&format!("    v{j} = os.path.join(path, \"{i}_{j}\")\n"));
        }
        source.push('\n');
    }
    let violations = run(DetectorKind::Identity, &source);
    assert_eq!(violations.len(), 1);
    let v = &violations[0];
    assert_eq!(v.rule_id, "god_object");
    assert_eq!((v.location.line, v.location.column), (1, 0));
    assert_eq!(v.metric("method_count"), Some(30.0));
    assert_eq!(v.metric("loc"), Some(661.0));
    assert!(v.description.contains("module"), "{}", v.description);
}

#[test]
fn god_object_counts_module_level_fields() {
    let source: String = (0..16).map(|i| format!("SETTING_{i} = {i}\n")).collect();
    let violations = run(DetectorKind::Identity, &source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].metric("field_count"), Some(16.0));
}

#[test]
fn god_object_module_and_leading_class_are_distinct() {
    let mut source = String::from("class Registry:\n");
    for i in 0..21 {
        source.push_str(&format!("    def m{i}(self):\n        return {i}\n"));
    }
    for i in 0..16 {
        source.push_str(&format!("LIMIT_{i} = {i}\n"));
    }
    let violations = run(DetectorKind::Identity, &source);
    assert_eq!(violations.len(), 2);
    assert_ne!(violations[0].id, violations[1].id);
}

#[test]
fn timing_sleep_in_loop_is_high() {
    let source = r#"
import time

def poll(job):
    while not job.done():
        time.sleep(0.5)

def pause():
    time.sleep(1)
"#;
    let violations = run(DetectorKind::Timing, source);
    let severities: Vec<Severity> = violations.iter().map(|v| v.severity).collect();
    assert_eq!(severities, vec![Severity::High, Severity::Medium]);
}

#[test]
fn timing_clock_comparison_is_flagged() {
    let source = "import time\n\ndef expired(deadline):\n    return time.time() > deadline\n";
    let violations = run(DetectorKind::Timing, source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, Severity::Medium);
}

#[test]
fn convention_flags_string_dispatch() {
    let source = r#"
def dispatch(handlers, event):
    return handlers["created"](event)
"#;
    let violations = run(DetectorKind::Convention, source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "connascence_of_convention");
}

#[test]
fn convention_flags_string_switch_chains() {
    let source = r#"
def handle(mode):
    if mode == "read":
        return 1
    elif mode == "write":
        return 2
    elif mode == "append":
        return 3
    return 0
"#;
    let violations = run(DetectorKind::Convention, source);
    assert_eq!(violations.len(), 1);
}

#[test]
fn convention_documented_protocol_is_accepted() {
    let source = r#"
def dispatch(handlers, event):
    """Keys: created, deleted."""
    return handlers["created"](event)
"#;
    assert!(run(DetectorKind::Convention, source).is_empty());
}

#[test]
fn values_flags_mutable_defaults() {
    let source = "def add(item, bucket=[]):\n    bucket.append(item)\n    return bucket\n\ndef safe(item, bucket=None):\n    return bucket\n";
    let violations = run(DetectorKind::Values, source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, Severity::High);
    assert_eq!(violations[0].location.line, 1);
}

#[test]
fn values_flags_shared_mutable_constants() {
    let source = "REGISTRY = {}\nLIMITS = (1, 2)\n";
    let violations = run(DetectorKind::Values, source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, Severity::Medium);
}

#[test]
fn execution_flags_import_time_side_effects() {
    let source = r#"
import sys

sys.path.append("/opt/plugins")
print("loading")

def main():
    print("running")

if __name__ == "__main__":
    main()
"#;
    let violations = run(DetectorKind::Execution, source);
    let lines: Vec<(usize, Severity)> = violations
        .iter()
        .map(|v| (v.location.line, v.severity))
        .collect();
    assert_eq!(lines, vec![(4, Severity::High), (5, Severity::Medium)]);
}

#[test]
fn detectors_are_reusable_across_units() {
    let detector = Detector::new(DetectorKind::Position, &DetectorsConfig::default());
    let unit = parse("def f(a, b, c, d):\n    pass\n");
    assert_eq!(detector.analyze(&unit), detector.analyze(&unit));
}
