use crate::ast::{NodeId, NodeKind, SourceUnit};
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

const MUTABLE_CONSTRUCTORS: &[&str] = &[
    "list",
    "dict",
    "set",
    "bytearray",
    "collections.defaultdict",
    "collections.OrderedDict",
    "collections.deque",
    "defaultdict",
    "OrderedDict",
    "deque",
];

/// Mutable values shared between every caller or every importer, so that a
/// write in one place changes what another place sees.
#[derive(Debug, Clone, Default)]
pub struct ValuesDetector;

impl ValuesDetector {
    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut violations = Vec::new();

        for func in ast.of_kind(|k| matches!(k, NodeKind::Function | NodeKind::Lambda)) {
            let func_name = ast.node(func).name.as_deref().unwrap_or("<lambda>");
            for param in ast.parameters(func) {
                let Some(default) = ast.child_in_field(param, "default") else {
                    continue;
                };
                if !is_mutable_value(unit, default) {
                    continue;
                }
                let name = ast.node(param).name_str();
                violations.push(
                    violation_at(
                        DetectorKind::Values,
                        unit,
                        param,
                        Severity::High,
                        format!(
                            "Parameter '{name}' of '{func_name}' has a mutable default shared across calls"
                        ),
                    )
                    .with_fix_hint("Default to None and create the value inside the function"),
                );
            }
        }

        for assign in ast.of_kind(|k| k == NodeKind::Assignment) {
            let Some(scope) = ast.enclosing_scope(assign) else {
                continue;
            };
            let scope_kind = ast.node(scope).kind;
            if !matches!(scope_kind, NodeKind::Module | NodeKind::Class) {
                continue;
            }
            let (Some(left), Some(right)) = (
                ast.child_in_field(assign, "left"),
                ast.child_in_field(assign, "right"),
            ) else {
                continue;
            };
            let target = ast.node(left);
            if target.kind != NodeKind::Identifier || !is_mutable_value(unit, right) {
                continue;
            }
            let name = target.name_str();
            let description = match scope_kind {
                NodeKind::Module if is_constant_name(name) => {
                    format!("Module constant '{name}' is bound to a mutable collection")
                }
                NodeKind::Class => format!(
                    "Class attribute '{name}' of '{}' is a mutable collection shared by all instances",
                    ast.node(scope).name_str()
                ),
                _ => continue,
            };
            violations.push(
                violation_at(DetectorKind::Values, unit, assign, Severity::Medium, description)
                    .with_fix_hint("Use an immutable tuple or frozenset, or build the value per instance"),
            );
        }

        violations
    }
}

fn is_mutable_value(unit: &SourceUnit, id: NodeId) -> bool {
    let node = unit.ast.node(id);
    if node.kind.is_mutable_collection() {
        return true;
    }
    match node.kind {
        NodeKind::Comprehension => node.raw_kind != "generator_expression",
        NodeKind::Call => MUTABLE_CONSTRUCTORS.contains(&node.name_str()),
        _ => false,
    }
}

/// UPPER_CASE with at least one letter.
pub(crate) fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_names() {
        assert!(is_constant_name("DEFAULTS"));
        assert!(is_constant_name("MAX_2"));
        assert!(!is_constant_name("defaults"));
        assert!(!is_constant_name("__"));
        assert!(!is_constant_name("Config"));
    }
}
