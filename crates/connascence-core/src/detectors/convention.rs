use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{NodeId, NodeKind, SourceUnit};
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

/// Distinct string cases on one subject before an if/elif chain counts as
/// a dispatch table.
const MIN_CHAIN_CASES: usize = 3;

/// String-keyed dispatch whose keys are an unwritten agreement between
/// caller and callee. Only reported where no docstring records the
/// convention.
#[derive(Debug, Clone, Default)]
pub struct ConventionDetector;

impl ConventionDetector {
    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut violations = Vec::new();

        for id in ast.ids() {
            let node = ast.node(id);
            let finding = match node.kind {
                NodeKind::Call => keyed_call(unit, id),
                NodeKind::Branch if node.raw_kind == "if_statement" => string_chain(unit, id),
                _ => None,
            };
            let Some(description) = finding else {
                continue;
            };
            if documented(unit, id) {
                continue;
            }
            violations.push(
                violation_at(DetectorKind::Convention, unit, id, Severity::Medium, description)
                    .with_fix_hint(
                        "Replace string keys with an enum or registry, or document the accepted keys",
                    ),
            );
        }

        violations
    }
}

fn keyed_call(unit: &SourceUnit, call: NodeId) -> Option<String> {
    let ast = &unit.ast;
    if let Some(callee) = ast.child_in_field(call, "function") {
        let callee_node = ast.node(callee);
        if callee_node.kind == NodeKind::Subscript {
            let key = ast.child_in_field(callee, "subscript")?;
            let key_node = ast.node(key);
            if key_node.kind == NodeKind::StringLiteral {
                return Some(format!(
                    "Dispatch through '{}' keyed by string \"{}\"",
                    callee_node.name_str(),
                    key_node.text_str()
                ));
            }
            return None;
        }
    }

    if ast.node(call).name_str() != "getattr" {
        return None;
    }
    let args = positional_args(unit, call);
    let name_arg = *args.get(1)?;
    let name_node = ast.node(name_arg);
    if name_node.kind == NodeKind::StringLiteral {
        Some(format!(
            "getattr() resolves attribute \"{}\" by string name",
            name_node.text_str()
        ))
    } else {
        Some("getattr() resolves an attribute from a computed name".to_string())
    }
}

fn positional_args(unit: &SourceUnit, call: NodeId) -> Vec<NodeId> {
    let ast = &unit.ast;
    match ast.child_in_field(call, "arguments") {
        Some(list) => ast
            .children(list)
            .filter(|&a| {
                let n = ast.node(a);
                n.kind != NodeKind::Comment && n.raw_kind != "keyword_argument"
            })
            .collect(),
        None => Vec::new(),
    }
}

/// `if x == "a": ... elif x == "b": ... elif x == "c": ...`
fn string_chain(unit: &SourceUnit, branch: NodeId) -> Option<String> {
    let ast = &unit.ast;
    let mut conditions = Vec::new();
    conditions.extend(ast.child_in_field(branch, "condition"));
    for alt in ast.children(branch) {
        let node = ast.node(alt);
        if node.kind == NodeKind::Branch && node.raw_kind == "elif_clause" {
            conditions.extend(ast.child_in_field(alt, "condition"));
        }
    }

    let mut cases: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for cond in conditions {
        if let Some((subject, key)) = string_equality(unit, cond) {
            cases.entry(subject).or_default().insert(key);
        }
    }

    let (subject, keys) = cases.into_iter().max_by_key(|(_, keys)| keys.len())?;
    if keys.len() < MIN_CHAIN_CASES {
        return None;
    }
    Some(format!(
        "if/elif chain dispatches on '{subject}' against {} string keys",
        keys.len()
    ))
}

fn string_equality(unit: &SourceUnit, cond: NodeId) -> Option<(String, String)> {
    let ast = &unit.ast;
    let node = ast.node(cond);
    if node.kind != NodeKind::Comparison || node.text_str() != "==" {
        return None;
    }
    let operands: Vec<NodeId> = ast.children(cond).collect();
    let [left, right] = operands.as_slice() else {
        return None;
    };
    let (subject, key) = match (ast.node(*left).kind, ast.node(*right).kind) {
        (_, NodeKind::StringLiteral) => (*left, *right),
        (NodeKind::StringLiteral, _) => (*right, *left),
        _ => return None,
    };
    let subject_node = ast.node(subject);
    if !matches!(subject_node.kind, NodeKind::Identifier | NodeKind::Attribute) {
        return None;
    }
    Some((
        subject_node.name_str().to_string(),
        ast.node(key).text_str().to_string(),
    ))
}

fn documented(unit: &SourceUnit, id: NodeId) -> bool {
    let ast = &unit.ast;
    let has_doc = |n: NodeId| ast.node(n).doc.is_some();
    if ast.enclosing_function(id).is_some_and(has_doc) {
        return true;
    }
    if ast
        .enclosing(id, |n| n.kind == NodeKind::Class)
        .is_some_and(has_doc)
    {
        return true;
    }
    ast.root().is_some_and(has_doc)
}
