use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::ast::{Ast, LoopKind, NodeId, NodeKind, SourceUnit};
use crate::config::DetectorsConfig;
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

/// Functions that repeat the same control-flow skeleton. This looks only at
/// the shape of loops and branches, never at tokens, so it also catches
/// copies whose expressions were rewritten.
#[derive(Debug, Clone)]
pub struct AlgorithmDetector {
    min_shape_nodes: usize,
}

impl AlgorithmDetector {
    pub fn new(config: &DetectorsConfig) -> Self {
        Self {
            min_shape_nodes: config.min_shape_nodes,
        }
    }

    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut first_seen: BTreeMap<String, NodeId> = BTreeMap::new();
        let mut violations = Vec::new();

        for func in ast.of_kind(|k| k == NodeKind::Function) {
            let (shape, size) = skeleton(ast, func);
            if size < self.min_shape_nodes {
                continue;
            }
            let digest = shape_hash(&shape);

            match first_seen.get(&digest) {
                None => {
                    first_seen.insert(digest, func);
                }
                Some(&original) => {
                    let name = ast.node(func).name_str();
                    let original_node = ast.node(original);
                    violations.push(
                        violation_at(
                            DetectorKind::Algorithm,
                            unit,
                            func,
                            Severity::Medium,
                            format!(
                                "Function '{name}' repeats the control-flow structure of '{}' (line {})",
                                original_node.name_str(),
                                original_node.span.start_line
                            ),
                        )
                        .with_fix_hint(
                            "Extract the shared algorithm into one helper and parameterize the differences",
                        )
                        .with_metric("shape_nodes", size as f64)
                        .with_metric("original_line", original_node.span.start_line as f64),
                    );
                }
            }
        }

        violations
    }
}

/// Bracketed skeleton of control-flow nodes and its node count. Nested
/// functions contribute nothing.
fn skeleton(ast: &Ast, func: NodeId) -> (String, usize) {
    let mut out = String::new();
    let mut count = 0;
    emit(ast, func, &mut out, &mut count);
    (out, count)
}

fn emit(ast: &Ast, id: NodeId, out: &mut String, count: &mut usize) {
    for child in ast.children(id) {
        let node = ast.node(child);
        if node.kind.is_scope() {
            continue;
        }
        let tag = match node.kind {
            NodeKind::Loop(LoopKind::For) => Some("F"),
            NodeKind::Loop(LoopKind::While) => Some("W"),
            NodeKind::Branch => Some("I"),
            NodeKind::Try => Some("T"),
            NodeKind::Except => Some("E"),
            NodeKind::With => Some("C"),
            NodeKind::Return => Some("R"),
            NodeKind::Raise => Some("X"),
            NodeKind::Break => Some("B"),
            NodeKind::Continue => Some("N"),
            _ => None,
        };
        match tag {
            Some(tag) => {
                *count += 1;
                out.push_str(tag);
                out.push('(');
                emit(ast, child, out, count);
                out.push(')');
            }
            None => emit(ast, child, out, count),
        }
    }
}

fn shape_hash(shape: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(shape.as_bytes());
    format!("{:x}", hasher.finalize())
}
