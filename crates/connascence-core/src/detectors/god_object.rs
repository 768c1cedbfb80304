use std::collections::BTreeSet;

use crate::ast::{NodeId, NodeKind, SourceUnit};
use crate::config::DetectorsConfig;
use crate::types::{Severity, SourceLocation, Violation};

use super::DetectorKind;

/// Measured size of one class or module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassMetrics {
    pub methods: usize,
    pub fields: usize,
    pub loc: usize,
}

/// Classes and modules whose identity has absorbed too many responsibilities.
#[derive(Debug, Clone)]
pub struct GodObjectDetector {
    max_methods: usize,
    max_fields: usize,
    max_loc: usize,
}

impl GodObjectDetector {
    pub fn new(config: &DetectorsConfig) -> Self {
        Self {
            max_methods: config.god_object_methods,
            max_fields: config.god_object_fields,
            max_loc: config.god_object_loc,
        }
    }

    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut violations = Vec::new();

        if let Some(root) = ast.root() {
            let name = unit
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let metrics = measure_module(unit, root);
            // Column 0 marks a file-level finding, so it never shares an id
            // with a class starting on line 1.
            let location = SourceLocation::new(&unit.path, 1, 0);
            violations.extend(self.check(location, "module", &name, metrics));
        }

        for class in ast.of_kind(|k| k == NodeKind::Class) {
            let metrics = measure(unit, class);
            let name = ast.node(class).name_str();
            violations.extend(self.check(unit.location_of(class), "class", name, metrics));
        }

        violations
    }

    fn check(
        &self,
        location: SourceLocation,
        what: &str,
        name: &str,
        metrics: ClassMetrics,
    ) -> Option<Violation> {
        let mut reasons = Vec::new();
        if metrics.methods > self.max_methods {
            reasons.push(format!("{} methods (max {})", metrics.methods, self.max_methods));
        }
        if metrics.fields > self.max_fields {
            reasons.push(format!("{} fields (max {})", metrics.fields, self.max_fields));
        }
        if metrics.loc > self.max_loc {
            reasons.push(format!("{} lines (max {})", metrics.loc, self.max_loc));
        }
        if reasons.is_empty() {
            return None;
        }

        let hint = if what == "module" {
            "Split the module into cohesive modules and re-export a small public surface"
        } else {
            "Split responsibilities into collaborating classes behind a facade"
        };
        Some(
            Violation::new(
                DetectorKind::Identity.violation_type(),
                DetectorKind::Identity.rule_id(),
                Severity::High,
                location,
                format!("God object ({what}) '{name}': {}", reasons.join(", ")),
            )
            .with_fix_hint(hint)
            .with_metric("method_count", metrics.methods as f64)
            .with_metric("field_count", metrics.fields as f64)
            .with_metric("loc", metrics.loc as f64)
            .with_metric("method_threshold", self.max_methods as f64)
            .with_metric("loc_threshold", self.max_loc as f64),
        )
    }
}

/// Module-level view: top-level functions are its methods, distinct
/// module-level assignment targets its fields, the whole file its size.
pub fn measure_module(unit: &SourceUnit, root: NodeId) -> ClassMetrics {
    let ast = &unit.ast;
    let mut fields: BTreeSet<String> = BTreeSet::new();
    let mut methods = 0;
    for id in ast.descendants_in_scope(root) {
        match ast.node(id).kind {
            NodeKind::Function => methods += 1,
            NodeKind::Assignment => {
                if let Some(target) = assignment_target(unit, id) {
                    fields.insert(target);
                }
            }
            _ => {}
        }
    }
    ClassMetrics {
        methods,
        fields: fields.len(),
        loc: unit.effective_loc(),
    }
}

/// Methods are functions directly in the class body; fields are class-level
/// assignment targets plus distinct `self.<attr>` targets inside methods.
pub fn measure(unit: &SourceUnit, class: NodeId) -> ClassMetrics {
    let ast = &unit.ast;
    let methods = ast.methods_of(class);
    let mut fields: BTreeSet<String> = BTreeSet::new();

    for id in ast.descendants_in_scope(class) {
        if ast.node(id).kind == NodeKind::Assignment {
            if let Some(target) = assignment_target(unit, id) {
                fields.insert(target);
            }
        }
    }

    for &method in &methods {
        for id in ast.descendants_in_scope(method) {
            if ast.node(id).kind != NodeKind::Assignment {
                continue;
            }
            if let Some(target) = assignment_target(unit, id) {
                if let Some(attr) = target.strip_prefix("self.") {
                    if !attr.contains('.') {
                        fields.insert(attr.to_string());
                    }
                }
            }
        }
    }

    ClassMetrics {
        methods: methods.len(),
        fields: fields.len(),
        loc: unit.node_loc(class),
    }
}

fn assignment_target(unit: &SourceUnit, assignment: NodeId) -> Option<String> {
    let left = unit.ast.child_in_field(assignment, "left")?;
    let node = unit.ast.node(left);
    match node.kind {
        NodeKind::Identifier | NodeKind::Attribute => node.name.clone(),
        _ => None,
    }
}
