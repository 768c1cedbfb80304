use crate::ast::{NodeKind, ParamKind, SourceUnit};
use crate::config::DetectorsConfig;
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

/// Functions that take more positional parameters than callers can be
/// expected to order correctly.
#[derive(Debug, Clone)]
pub struct PositionDetector {
    max_positional: usize,
}

impl PositionDetector {
    pub fn new(config: &DetectorsConfig) -> Self {
        Self {
            max_positional: config.max_positional_params,
        }
    }

    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut violations = Vec::new();

        for func in ast.of_kind(|k| k == NodeKind::Function) {
            let params = ast.parameters(func);
            let mut positional: Vec<&str> = params
                .iter()
                .map(|&p| ast.node(p))
                .filter(|n| n.kind == NodeKind::Parameter(ParamKind::Regular))
                .map(|n| n.name_str())
                .collect();

            if ast.is_method(func)
                && matches!(positional.first(), Some(&"self") | Some(&"cls"))
                && !is_static(unit, func)
            {
                positional.remove(0);
            }

            let count = positional.len();
            if count <= self.max_positional {
                continue;
            }

            let severity = if count >= self.max_positional * 2 {
                Severity::High
            } else {
                Severity::Medium
            };
            let name = ast.node(func).name_str();
            violations.push(
                violation_at(
                    DetectorKind::Position,
                    unit,
                    func,
                    severity,
                    format!(
                        "Function '{name}' takes {count} positional parameters (max {})",
                        self.max_positional
                    ),
                )
                .with_fix_hint(
                    "Group related parameters into a parameter object or make them keyword-only",
                )
                .with_metric("parameter_count", count as f64)
                .with_metric("threshold", self.max_positional as f64),
            );
        }

        violations
    }
}

fn is_static(unit: &SourceUnit, func: usize) -> bool {
    unit.ast
        .children(func)
        .map(|c| unit.ast.node(c))
        .any(|n| n.kind == NodeKind::Decorator && n.name_str() == "staticmethod")
}
