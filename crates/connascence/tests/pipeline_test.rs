/// End-to-end runs of the engine over Python fixtures written to temp dirs.
use std::fs;
use std::path::{Path, PathBuf};

use connascence::{
    AnalysisRequest, CancellationToken, Config, DiagnosticKind, Engine, ViolationType,
};

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn engine() -> Engine {
    Engine::new(Config::default()).unwrap()
}

fn request(dir: &Path, policy: &str) -> AnalysisRequest {
    AnalysisRequest::new(vec![dir.to_path_buf()], policy)
}

fn big_class(methods: usize) -> String {
    let mut source = String::from("class Manager:\n");
    for i in 0..methods {
        source.push_str(&format!("    def op{i}(self, value):\n        return value\n\n"));
    }
    source
}

const AGGREGATE_A: &str = r#"
def compute_totals(orders, ledger):
    total = 0
    count = 0
    skipped = []
    for order in orders:
        if order.paid:
            total += order.amount
            count += 1
        else:
            skipped.append(order)
    for entry in ledger.entries():
        if entry.kind == order.kind:
            total -= entry.fee
        ledger.mark(entry)
    summary = ledger.summarize(total, count)
    summary.skipped = skipped
    summary.finalize()
    ledger.close()
    return summary
"#;

const AGGREGATE_B: &str = r#"
def tally_invoices(invoices, book):
    amount = 0
    seen = 0
    pending = []
    for invoice in invoices:
        if invoice.settled:
            amount += invoice.value
            seen += 1
        else:
            pending.append(invoice)
    for line in book.lines():
        if line.kind == invoice.kind:
            amount -= line.charge
        book.mark(line)
    report = book.summarize(amount, seen)
    report.skipped = pending
    report.finalize()
    book.close()
    return report
"#;

// ----------------------------------------------------------------------------
// Scenario: strict policy rejects a god object
// Given a class with 30 methods
// When it is analyzed under "strict"
// Then exactly one god object is counted and the gate fails
// ----------------------------------------------------------------------------
#[test]
fn strict_policy_fails_on_god_object() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "manager.py", &big_class(30));

    let report = engine().analyze(&request(tmp.path(), "strict"));

    assert!(report.success());
    assert_eq!(report.policy(), "strict");
    assert_eq!(report.summary().god_objects, 1);
    assert!(!report.passed());
    let failed: Vec<&str> = report
        .gate()
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name.as_str())
        .collect();
    assert!(failed.contains(&"max_god_objects"), "{failed:?}");
}

#[test]
fn lenient_policy_tolerates_one_god_object() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "manager.py", &big_class(30));

    let report = engine().analyze(&request(tmp.path(), "lenient"));

    let god_check = report
        .gate()
        .checks
        .iter()
        .find(|c| c.name == "max_god_objects")
        .unwrap();
    assert!(god_check.passed);
}

// ----------------------------------------------------------------------------
// Scenario: renamed copies are one duplication cluster
// ----------------------------------------------------------------------------
#[test]
fn renamed_copies_form_one_cluster() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "billing/orders.py", AGGREGATE_A);
    write(tmp.path(), "billing/invoices.py", AGGREGATE_B);

    let report = engine().analyze(&request(tmp.path(), "standard"));

    let clusters = report.duplication_clusters();
    assert_eq!(clusters.len(), 1, "{clusters:?}");
    assert!(clusters[0].similarity >= 0.8);
    assert_eq!(clusters[0].members.len(), 2);
    assert!(report.summary().duplication_score < 1.0);
}

#[test]
fn duplicated_module_scripts_cluster() {
    let script = |cfg: &str, pool: &str, item: &str| {
        format!(
            "import sys\n\n\
             {cfg} = load_settings(sys.argv[1])\n\
             {pool} = []\n\
             for index in range({cfg}.worker_count):\n    \
                 {item} = spawn_worker({cfg}, index)\n    \
                 {pool}.append({item})\n\
             for {item} in {pool}:\n    \
                 {item}.join(timeout={cfg}.join_timeout)\n\
             status = summarize({pool})\n"
        )
    };
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "run_a.py", &script("config", "workers", "worker"));
    write(tmp.path(), "run_b.py", &script("settings", "procs", "proc"));

    let report = engine().analyze(&request(tmp.path(), "standard"));

    let clusters = report.duplication_clusters();
    assert_eq!(clusters.len(), 1, "{clusters:?}");
    assert_eq!(clusters[0].members.len(), 2);
    assert!(clusters[0].members.iter().all(|m| m.name == "<module>"));
    assert_eq!(clusters[0].representative.location.line, 3);
}

#[test]
fn no_duplication_scores_full_mece() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "orders.py", AGGREGATE_A);
    write(
        tmp.path(),
        "util.py",
        "def clamp(value, low, high):\n    return max(low, min(value, high))\n",
    );

    let report = engine().analyze(&request(tmp.path(), "standard"));

    assert!(report.duplication_clusters().is_empty());
    assert_eq!(report.summary().duplication_score, 1.0);
}

// ----------------------------------------------------------------------------
// Scenario: unknown policy falls back
// ----------------------------------------------------------------------------
#[test]
fn unknown_policy_falls_back_to_standard() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.py", "def f(a):\n    return a\n");

    let report = engine().analyze(&request(tmp.path(), "foo"));

    assert!(report.success());
    assert_eq!(report.policy(), "standard");
    assert!(report
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::PolicyFallback && d.message.contains("foo")));
}

#[test]
fn legacy_alias_resolves_with_warning() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.py", "x = 1\n");

    let report = engine().analyze(&request(tmp.path(), "nasa_jpl_pot10"));

    assert_eq!(report.policy(), "nasa-compliance");
    assert!(report
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::PolicyFallback));
}

// ----------------------------------------------------------------------------
// Scenario: the detector pool stays bounded under load
// ----------------------------------------------------------------------------
#[test]
fn pool_stays_bounded_with_many_files() {
    let tmp = tempfile::tempdir().unwrap();
    for i in 0..100 {
        write(
            tmp.path(),
            &format!("pkg/mod_{i:03}.py"),
            &format!(
                "def handler_{i}(a, b, c, d):\n    if a == {}:\n        return b\n    return c\n",
                i + 100
            ),
        );
    }
    let mut config = Config::default();
    config.analysis.workers = 8;
    config.pool.max_per_type = 4;

    let report = Engine::new(config)
        .unwrap()
        .analyze(&request(tmp.path(), "standard"));

    assert_eq!(report.metrics().files_analyzed, 100);
    assert_eq!(report.metrics().pool.len(), 8);
    for (kind, stats) in &report.metrics().pool {
        assert!(stats.peak_live <= 4, "{kind}: {stats:?}");
        assert!(stats.created >= 1, "{kind}: {stats:?}");
    }
    let positions = report
        .violations()
        .iter()
        .filter(|v| v.kind == ViolationType::Position)
        .count();
    assert_eq!(positions, 100);
}

// ----------------------------------------------------------------------------
// Scenario: identical inputs give identical reports
// ----------------------------------------------------------------------------
#[test]
fn reports_are_deterministic_across_runs_and_worker_counts() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.py", AGGREGATE_A);
    write(tmp.path(), "b.py", AGGREGATE_B);
    write(tmp.path(), "c.py", &big_class(25));
    write(tmp.path(), "broken.py", "def broken(:\n");

    let req = request(tmp.path(), "standard");
    let first = engine().analyze(&req);
    let second = engine().analyze(&req);
    assert_eq!(first.content_digest(), second.content_digest());

    let mut single = Config::default();
    single.analysis.workers = 1;
    let serial = Engine::new(single).unwrap().analyze(&req);
    assert_eq!(first.content_digest(), serial.content_digest());
    assert_eq!(first.violations(), serial.violations());
}

#[test]
fn duplicate_request_paths_are_analyzed_once() {
    let tmp = tempfile::tempdir().unwrap();
    let file = write(tmp.path(), "a.py", "def f(a, b, c, d):\n    pass\n");

    let report = engine().analyze(&AnalysisRequest::new(
        vec![file.clone(), tmp.path().to_path_buf(), file],
        "standard",
    ));

    assert_eq!(report.metrics().files_analyzed, 1);
}

// ----------------------------------------------------------------------------
// Scenario: a syntax error skips one file, not the run
// ----------------------------------------------------------------------------
#[test]
fn parse_error_is_recovered() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "good.py", "def f(a, b, c, d):\n    pass\n");
    write(tmp.path(), "bad.py", "def broken(:\n    pass\n");

    let report = engine().analyze(&request(tmp.path(), "standard"));

    assert!(report.success());
    assert!(!report.partial());
    assert_eq!(report.metrics().files_analyzed, 1);
    assert_eq!(report.metrics().files_skipped, 1);
    let parse_errors: Vec<_> = report
        .diagnostics()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::ParseError)
        .collect();
    assert_eq!(parse_errors.len(), 1);
    assert!(parse_errors[0]
        .path
        .as_ref()
        .is_some_and(|p| p.ends_with("bad.py")));
    assert_eq!(report.violations().len(), report.summary().total);
}

#[test]
fn missing_path_is_a_read_error() {
    let tmp = tempfile::tempdir().unwrap();
    let report = engine().analyze(&AnalysisRequest::new(
        vec![tmp.path().join("nope.py")],
        "standard",
    ));

    assert!(report.success());
    assert!(report
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::ReadError));
}

#[test]
fn cancelled_run_is_partial() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.py", "x = 1\n");
    write(tmp.path(), "b.py", "y = 2\n");
    let token = CancellationToken::new();
    token.cancel();

    let report = engine().analyze_with_cancel(&request(tmp.path(), "standard"), &token);

    assert!(report.partial());
    assert_eq!(report.metrics().files_analyzed, 0);
    assert_eq!(
        report
            .diagnostics()
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Cancelled)
            .count(),
        2
    );
}

#[test]
fn excluded_directories_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/app.py", "x = 1\n");
    write(tmp.path(), ".venv/lib/dep.py", "y = 2\n");

    let report = engine().analyze(&request(tmp.path(), "standard"));

    assert_eq!(report.metrics().files_analyzed, 1);
}

// ----------------------------------------------------------------------------
// Scenario: incremental runs reuse unchanged files
// ----------------------------------------------------------------------------
#[test]
fn incremental_run_reuses_cache() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.py", "def f(a, b, c, d):\n    pass\n");
    write(tmp.path(), "b.py", AGGREGATE_A);
    let engine = engine();
    let req = request(tmp.path(), "standard");

    let cold = engine.analyze_incremental(&req, tmp.path());
    assert_eq!(cold.metrics().files_from_cache, 0);
    assert!(tmp.path().join(".connascence/cache.json").exists());

    let warm = engine.analyze_incremental(&req, tmp.path());
    assert_eq!(warm.metrics().files_from_cache, 2);
    assert_eq!(cold.content_digest(), warm.content_digest());

    write(tmp.path(), "a.py", "def f(a):\n    pass\n");
    let changed = engine.analyze_incremental(&req, tmp.path());
    assert_eq!(changed.metrics().files_from_cache, 1);
    assert!(changed
        .violations()
        .iter()
        .all(|v| v.kind != ViolationType::Position));
}

#[test]
fn recommendations_follow_report() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "manager.py", &big_class(30));
    let engine = engine();

    let report = engine.analyze(&request(tmp.path(), "standard"));
    let groups = engine.recommendations(&report);

    let god = groups
        .iter()
        .find(|g| g.kind == ViolationType::GodObject)
        .unwrap();
    assert_eq!(god.occurrences, 1);
    assert_eq!(god.recommendations[0].technique, "Extract Class + Facade");
}

#[test]
fn scores_stay_in_unit_range() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.py", AGGREGATE_A);
    write(tmp.path(), "b.py", AGGREGATE_B);
    write(tmp.path(), "c.py", &big_class(40));

    let report = engine().analyze(&request(tmp.path(), "nasa-compliance"));
    let s = report.summary();
    for score in [
        s.connascence_score,
        s.duplication_score,
        s.rule_compliance_score,
        s.overall_quality_score,
    ] {
        assert!((0.0..=1.0).contains(&score), "{score}");
    }
}
