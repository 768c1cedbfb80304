use std::collections::BTreeSet;

use crate::ast::{NodeId, NodeKind, SourceUnit};
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

/// Calls whose effect is process-global and survives the importing module.
const GLOBAL_STATE_CALLS: &[&str] = &[
    "sys.path.append",
    "sys.path.insert",
    "sys.path.extend",
    "sys.path.remove",
    "os.chdir",
    "os.putenv",
    "os.unsetenv",
    "os.environ.update",
    "os.environ.setdefault",
    "os.environ.pop",
    "os.environ.clear",
];

const GLOBAL_STATE_ROOTS: &[&str] = &["sys.path", "os.environ"];

/// Side effects whose result depends on the order in which modules are
/// imported or functions are run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDetector;

impl ExecutionDetector {
    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let imported = imported_names(unit);
        let mut violations = Vec::new();

        for stmt in ast.of_kind(|k| k == NodeKind::ExprStmt) {
            if !ast.is_module_level(stmt) || under_main_guard(unit, stmt) {
                continue;
            }
            let Some(call) = ast
                .children(stmt)
                .find(|&c| ast.node(c).kind == NodeKind::Call)
            else {
                continue;
            };
            let callee = ast.node(call).name_str();
            let (severity, description) = if GLOBAL_STATE_CALLS.contains(&callee) {
                (
                    Severity::High,
                    format!("Import-time call '{callee}' mutates process-global state"),
                )
            } else {
                (
                    Severity::Medium,
                    format!("Module-level call '{callee}' runs as a side effect of import"),
                )
            };
            violations.push(
                violation_at(DetectorKind::Execution, unit, stmt, severity, description)
                    .with_fix_hint("Move the call into an explicit init function or a __main__ guard"),
            );
        }

        for assign in ast.of_kind(|k| k == NodeKind::Assignment) {
            if !ast.is_module_level(assign) || under_main_guard(unit, assign) {
                continue;
            }
            let Some(left) = ast.child_in_field(assign, "left") else {
                continue;
            };
            if let Some(violation) = module_patch(unit, assign, left, &imported) {
                violations.push(violation);
            }
        }

        for id in ast.of_kind(|k| k == NodeKind::Global) {
            let node = ast.node(id);
            if node.raw_kind != "global_statement" || ast.enclosing_function(id).is_none() {
                continue;
            }
            violations.push(
                violation_at(
                    DetectorKind::Execution,
                    unit,
                    id,
                    Severity::Low,
                    format!(
                        "Function rebinds module global '{}'; callers depend on call order",
                        node.name_str()
                    ),
                )
                .with_fix_hint("Return the new value or keep the state on an object"),
            );
        }

        violations
    }
}

fn module_patch(
    unit: &SourceUnit,
    assign: NodeId,
    left: NodeId,
    imported: &BTreeSet<String>,
) -> Option<Violation> {
    let ast = &unit.ast;
    let target = ast.node(left);
    let path = match target.kind {
        NodeKind::Attribute | NodeKind::Subscript => target.name_str(),
        _ => return None,
    };

    if GLOBAL_STATE_ROOTS
        .iter()
        .any(|root| path == *root || path.starts_with(&format!("{root}.")))
    {
        return Some(
            violation_at(
                DetectorKind::Execution,
                unit,
                assign,
                Severity::High,
                format!("Import-time write to '{path}' mutates process-global state"),
            )
            .with_fix_hint("Configure the environment in the entry point, not at import"),
        );
    }

    if target.kind != NodeKind::Attribute {
        return None;
    }
    let root = path.split('.').next().unwrap_or(path);
    if !imported.contains(root) {
        return None;
    }
    Some(
        violation_at(
            DetectorKind::Execution,
            unit,
            assign,
            Severity::Medium,
            format!("Module-level assignment patches imported module attribute '{path}'"),
        )
        .with_fix_hint("Pass the configuration explicitly instead of patching another module"),
    )
}

/// Names bound by import statements anywhere in the unit.
fn imported_names(unit: &SourceUnit) -> BTreeSet<String> {
    unit.ast
        .of_kind(|k| k == NodeKind::Import)
        .into_iter()
        .flat_map(|id| {
            unit.ast
                .node(id)
                .text_str()
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty() && *n != "*")
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn under_main_guard(unit: &SourceUnit, id: NodeId) -> bool {
    unit.ast.ancestors(id).any(|a| is_main_guard(unit, a))
}

/// `if __name__ == "__main__":`
pub(crate) fn is_main_guard(unit: &SourceUnit, id: NodeId) -> bool {
    let ast = &unit.ast;
    let node = ast.node(id);
    if node.kind != NodeKind::Branch {
        return false;
    }
    let Some(cond) = ast.child_in_field(id, "condition") else {
        return false;
    };
    let cond_node = ast.node(cond);
    if cond_node.kind != NodeKind::Comparison || cond_node.text_str() != "==" {
        return false;
    }
    let mut saw_name = false;
    let mut saw_main = false;
    for operand in ast.children(cond) {
        let n = ast.node(operand);
        match n.kind {
            NodeKind::Identifier if n.name_str() == "__name__" => saw_name = true,
            NodeKind::StringLiteral if n.text_str() == "__main__" => saw_main = true,
            _ => {}
        }
    }
    saw_name && saw_main
}
