use crate::ast::{NodeId, NodeKind, SourceUnit};
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

const SLEEP_CALLS: &[&str] = &["sleep", "time.sleep", "asyncio.sleep", "gevent.sleep", "trio.sleep"];

const CLOCK_CALLS: &[&str] = &[
    "time.time",
    "time.monotonic",
    "time.perf_counter",
    "datetime.now",
    "datetime.utcnow",
    "datetime.datetime.now",
    "datetime.datetime.utcnow",
];

/// Ordering that depends on elapsed wall-clock time rather than on an
/// explicit synchronization point.
#[derive(Debug, Clone, Default)]
pub struct TimingDetector;

impl TimingDetector {
    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut violations = Vec::new();

        for call in ast.of_kind(|k| k == NodeKind::Call) {
            let callee = ast.node(call).name_str();

            if SLEEP_CALLS.contains(&callee) {
                let in_loop = in_loop_within_scope(unit, call);
                let severity = if in_loop {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let context = if in_loop { " inside a loop" } else { "" };
                violations.push(
                    violation_at(
                        DetectorKind::Timing,
                        unit,
                        call,
                        severity,
                        format!("'{callee}' used to order work{context}"),
                    )
                    .with_fix_hint(
                        "Wait on an explicit event, condition, future or queue instead of sleeping",
                    )
                    .with_metric("in_loop", if in_loop { 1.0 } else { 0.0 }),
                );
            } else if CLOCK_CALLS.contains(&callee) && in_comparison(unit, call) {
                violations.push(
                    violation_at(
                        DetectorKind::Timing,
                        unit,
                        call,
                        Severity::Medium,
                        format!("Control flow compares against wall-clock '{callee}()'"),
                    )
                    .with_fix_hint("Inject a clock or use a deadline object so ordering is testable"),
                );
            }
        }

        violations
    }
}

fn in_loop_within_scope(unit: &SourceUnit, id: NodeId) -> bool {
    for ancestor in unit.ast.ancestors(id) {
        let kind = unit.ast.node(ancestor).kind;
        if kind.is_scope() {
            return false;
        }
        if matches!(kind, NodeKind::Loop(_)) {
            return true;
        }
    }
    false
}

fn in_comparison(unit: &SourceUnit, id: NodeId) -> bool {
    for ancestor in unit.ast.ancestors(id) {
        let kind = unit.ast.node(ancestor).kind;
        if kind == NodeKind::Comparison {
            return true;
        }
        if kind.is_scope() || matches!(kind, NodeKind::ExprStmt | NodeKind::Block) {
            return false;
        }
    }
    false
}
