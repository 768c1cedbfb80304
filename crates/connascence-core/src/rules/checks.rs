use std::collections::BTreeSet;

use regex::Regex;

use crate::ast::{LoopKind, NodeId, NodeKind, SourceUnit};
use crate::types::Severity;

use super::Finding;

/// Calls whose only useful effect is their return value.
const MUST_USE_CALLS: &[&str] = &[
    "sorted",
    "reversed",
    "map",
    "filter",
    "zip",
    "enumerate",
    "len",
    "str",
    "int",
    "float",
    "abs",
    "round",
    "min",
    "max",
    "sum",
    "any",
    "all",
    "copy.copy",
    "copy.deepcopy",
    "re.sub",
    "re.match",
    "re.search",
    "re.findall",
    "os.system",
    "subprocess.call",
    "os.path.join",
    "os.path.exists",
];

/// String methods that return a transformed copy.
const STR_TRANSFORMS: &[&str] = &[
    "strip",
    "lstrip",
    "rstrip",
    "upper",
    "lower",
    "casefold",
    "capitalize",
    "title",
    "format",
    "encode",
    "decode",
    "join",
    "removeprefix",
    "removesuffix",
];

const REFERENCE_CALLS: &[&str] = &[
    "id",
    "ctypes.pointer",
    "ctypes.POINTER",
    "ctypes.byref",
    "ctypes.addressof",
    "ctypes.cast",
    "ctypes.string_at",
    "weakref.proxy",
    "weakref.ref",
];

const ALLOCATING_CALLS: &[&str] = &["list", "dict", "set", "bytearray"];

const DYNAMIC_IMPORTS: &[&str] = &["__import__", "importlib.import_module", "importlib.__import__"];

const UNBOUNDED_ITERATORS: &[&str] = &["itertools.count", "itertools.cycle", "count", "cycle"];

fn functions(unit: &SourceUnit) -> Vec<NodeId> {
    unit.ast.of_kind(|k| k == NodeKind::Function)
}

/// Each function plus the module.
fn scope_units(unit: &SourceUnit) -> usize {
    functions(unit).len() + usize::from(unit.ast.root().is_some())
}

/// The scope unit a node is charged to: its function, or the module.
fn scope_of(unit: &SourceUnit, id: NodeId) -> NodeId {
    unit.ast
        .enclosing(id, |n| n.kind == NodeKind::Function)
        .or_else(|| unit.ast.root())
        .unwrap_or(id)
}

fn call_name(unit: &SourceUnit, id: NodeId) -> &str {
    unit.ast.node(id).name_str()
}

fn first_positional_arg(unit: &SourceUnit, call: NodeId) -> Option<NodeId> {
    let ast = &unit.ast;
    let args = ast.child_in_field(call, "arguments")?;
    ast.children(args).find(|&a| {
        let n = ast.node(a);
        n.kind != NodeKind::Comment && n.raw_kind != "keyword_argument"
    })
}

fn constant_true(unit: &SourceUnit, cond: NodeId) -> bool {
    let node = unit.ast.node(cond);
    match node.kind {
        NodeKind::BoolLiteral => node.text_str() == "True",
        NodeKind::NumberLiteral => crate::detectors::meaning::numeric_value(node.text_str())
            .map(|v| v != 0.0)
            .unwrap_or(false),
        NodeKind::StringLiteral => !node.text_str().is_empty(),
        _ => false,
    }
}

/// True when some statement inside `target` leaves it: a `break` belonging
/// to this loop, or a `return`/`raise` anywhere in the same function.
fn has_exit(unit: &SourceUnit, target: NodeId) -> bool {
    let ast = &unit.ast;
    ast.descendants_in_scope(target).into_iter().any(|d| match ast.node(d).kind {
        NodeKind::Return | NodeKind::Raise => true,
        NodeKind::Break => ast.enclosing(d, |n| matches!(n.kind, NodeKind::Loop(_))) == Some(target),
        _ => false,
    })
}

pub(super) fn bounded_loops(unit: &SourceUnit) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let loops = ast.of_kind(|k| matches!(k, NodeKind::Loop(_)));
    let mut findings = Vec::new();

    for &lp in &loops {
        let unbounded = match ast.node(lp).kind {
            NodeKind::Loop(LoopKind::While) => ast
                .child_in_field(lp, "condition")
                .is_some_and(|c| constant_true(unit, c)),
            NodeKind::Loop(LoopKind::For) => ast.child_in_field(lp, "right").is_some_and(|r| {
                let n = ast.node(r);
                n.kind == NodeKind::Call && UNBOUNDED_ITERATORS.contains(&n.name_str())
            }),
            _ => false,
        };
        if unbounded && !has_exit(unit, lp) {
            findings.push(Finding {
                unit: lp,
                at: lp,
                severity: Severity::Critical,
                description: "Loop has no bound and no break, return or raise".to_string(),
            });
        }
    }

    (loops.len(), findings)
}

/// Functions that call themselves directly. Reported under the bounded-loop
/// rule but kept out of its loop tally.
pub(super) fn recursion(unit: &SourceUnit) -> Vec<Finding> {
    let ast = &unit.ast;
    let mut findings = Vec::new();
    for func in functions(unit) {
        let name = ast.node(func).name_str();
        if name.is_empty() {
            continue;
        }
        let self_call = format!("self.{name}");
        let calls_itself = ast.descendants_in_scope(func).into_iter().any(|d| {
            let n = ast.node(d);
            n.kind == NodeKind::Call && (n.name_str() == name || n.name_str() == self_call)
        });
        if calls_itself {
            findings.push(Finding {
                unit: func,
                at: func,
                severity: Severity::High,
                description: format!("Function '{name}' calls itself recursively"),
            });
        }
    }
    findings
}

pub(super) fn function_size(unit: &SourceUnit, max_loc: usize) -> (usize, Vec<Finding>) {
    let funcs = functions(unit);
    let findings = funcs
        .iter()
        .filter_map(|&f| {
            let loc = unit.node_loc(f);
            (loc > max_loc).then(|| Finding {
                unit: f,
                at: f,
                severity: Severity::High,
                description: format!(
                    "Function '{}' has {loc} effective lines (max {max_loc})",
                    unit.ast.node(f).name_str()
                ),
            })
        })
        .collect();
    (funcs.len(), findings)
}

pub(super) fn assertion_density(
    unit: &SourceUnit,
    min_loc: usize,
    min_assertions: usize,
) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let mut eligible = 0;
    let mut findings = Vec::new();

    for func in functions(unit) {
        let loc = unit.node_loc(func);
        if loc < min_loc {
            continue;
        }
        eligible += 1;
        let checks = ast
            .descendants_in_scope(func)
            .into_iter()
            .filter(|&d| matches!(ast.node(d).kind, NodeKind::Assert | NodeKind::Raise))
            .count();
        if checks < min_assertions {
            findings.push(Finding {
                unit: func,
                at: func,
                severity: Severity::Low,
                description: format!(
                    "Function '{}' has {loc} lines but {checks} assertions (min {min_assertions})",
                    ast.node(func).name_str()
                ),
            });
        }
    }

    (eligible, findings)
}

pub(super) fn return_value_checks(unit: &SourceUnit) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let mut eligible = 0;
    let mut findings = Vec::new();

    for stmt in ast.of_kind(|k| k == NodeKind::ExprStmt) {
        let Some(call) = ast
            .children(stmt)
            .find(|&c| ast.node(c).kind == NodeKind::Call)
        else {
            continue;
        };
        eligible += 1;
        let name = call_name(unit, call);
        let method = name.rsplit_once('.').map(|(_, m)| m);
        let must_use = MUST_USE_CALLS.contains(&name)
            || method.is_some_and(|m| STR_TRANSFORMS.contains(&m));
        if must_use {
            findings.push(Finding {
                unit: stmt,
                at: call,
                severity: Severity::Medium,
                description: format!("Result of '{name}()' is discarded"),
            });
        }
    }

    (eligible, findings)
}

pub(super) fn restricted_references(unit: &SourceUnit) -> (usize, Vec<Finding>) {
    let findings = unit
        .ast
        .of_kind(|k| k == NodeKind::Call)
        .into_iter()
        .filter(|&c| REFERENCE_CALLS.contains(&call_name(unit, c)))
        .map(|c| Finding {
            unit: scope_of(unit, c),
            at: c,
            severity: Severity::Medium,
            description: format!("'{}()' exposes object identity or raw memory", call_name(unit, c)),
        })
        .collect();
    (scope_units(unit), findings)
}

fn is_allocation(unit: &SourceUnit, id: NodeId) -> bool {
    let node = unit.ast.node(id);
    node.kind.is_mutable_collection()
        || (node.kind == NodeKind::Comprehension && node.raw_kind != "generator_expression")
        || (node.kind == NodeKind::Call && ALLOCATING_CALLS.contains(&node.name_str()))
}

pub(super) fn restricted_allocation(unit: &SourceUnit) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let mut findings = Vec::new();

    for lp in ast.of_kind(|k| matches!(k, NodeKind::Loop(_))) {
        let Some(body) = ast.child_in_field(lp, "body") else {
            continue;
        };
        let allocations = ast
            .descendants_in_scope(body)
            .into_iter()
            .filter(|&d| is_allocation(unit, d))
            .filter(|&d| ast.enclosing(d, |n| matches!(n.kind, NodeKind::Loop(_))) == Some(lp))
            .count();
        if allocations > 0 {
            findings.push(Finding {
                unit: scope_of(unit, lp),
                at: lp,
                severity: Severity::Low,
                description: format!("Loop body allocates {allocations} collection(s) per iteration"),
            });
        }
    }

    (scope_units(unit), findings)
}

pub(super) fn minimal_scope(unit: &SourceUnit) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let findings = ast
        .of_kind(|k| k == NodeKind::Global)
        .into_iter()
        .filter_map(|g| {
            let func = ast.enclosing(g, |n| n.kind == NodeKind::Function)?;
            let node = ast.node(g);
            let keyword = if node.raw_kind == "nonlocal_statement" {
                "nonlocal"
            } else {
                "global"
            };
            Some(Finding {
                unit: func,
                at: g,
                severity: Severity::Medium,
                description: format!(
                    "Function '{}' rebinds outer names with '{keyword} {}'",
                    ast.node(func).name_str(),
                    node.name_str()
                ),
            })
        })
        .collect();
    (functions(unit).len(), findings)
}

pub(super) fn limited_metaprogramming(
    unit: &SourceUnit,
    max_decorators: usize,
) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let mut findings = Vec::new();

    for id in ast.ids() {
        let node = ast.node(id);
        match node.kind {
            NodeKind::Import if node.text_str() == "*" => findings.push(Finding {
                unit: scope_of(unit, id),
                at: id,
                severity: Severity::Medium,
                description: format!("Wildcard import from '{}'", node.name_str()),
            }),
            NodeKind::Call if DYNAMIC_IMPORTS.contains(&node.name_str()) => {
                findings.push(Finding {
                    unit: scope_of(unit, id),
                    at: id,
                    severity: Severity::Medium,
                    description: format!("Dynamic import through '{}()'", node.name_str()),
                })
            }
            NodeKind::Function | NodeKind::Class => {
                let decorators = ast
                    .children(id)
                    .filter(|&c| ast.node(c).kind == NodeKind::Decorator)
                    .count();
                if decorators > max_decorators {
                    let charged = if node.kind == NodeKind::Function {
                        id
                    } else {
                        scope_of(unit, id)
                    };
                    findings.push(Finding {
                        unit: charged,
                        at: id,
                        severity: Severity::Medium,
                        description: format!(
                            "'{}' stacks {decorators} decorators (max {max_decorators})",
                            node.name_str()
                        ),
                    });
                }
            }
            _ => {}
        }
    }

    (scope_units(unit), findings)
}

fn attribute_depth(unit: &SourceUnit, id: NodeId) -> usize {
    let ast = &unit.ast;
    let mut depth = 0;
    let mut current = Some(id);
    while let Some(node_id) = current {
        if ast.node(node_id).kind != NodeKind::Attribute {
            break;
        }
        depth += 1;
        current = ast.child_in_field(node_id, "object");
    }
    depth
}

pub(super) fn restricted_indirection(
    unit: &SourceUnit,
    max_depth: usize,
) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let mut findings = Vec::new();

    for id in ast.ids() {
        let node = ast.node(id);
        match node.kind {
            NodeKind::Call if matches!(node.name_str(), "eval" | "exec") => {
                findings.push(Finding {
                    unit: scope_of(unit, id),
                    at: id,
                    severity: Severity::Critical,
                    description: format!("'{}()' executes dynamically built code", node.name_str()),
                })
            }
            NodeKind::Attribute => {
                let nested = node.in_field("object")
                    && node
                        .parent
                        .is_some_and(|p| ast.node(p).kind == NodeKind::Attribute);
                if nested {
                    continue;
                }
                let depth = attribute_depth(unit, id);
                if depth > max_depth {
                    findings.push(Finding {
                        unit: scope_of(unit, id),
                        at: id,
                        severity: Severity::Medium,
                        description: format!(
                            "Attribute chain '{}' is {depth} levels deep (max {max_depth})",
                            node.name_str()
                        ),
                    });
                }
            }
            _ => {}
        }
    }

    (scope_units(unit), findings)
}

pub(super) fn zero_warnings(unit: &SourceUnit, suppressions: &[Regex]) -> (usize, Vec<Finding>) {
    let ast = &unit.ast;
    let mut findings = Vec::new();
    let mut commented_lines = BTreeSet::new();

    for id in ast.ids() {
        let node = ast.node(id);
        match node.kind {
            NodeKind::Comment => {
                let text = node.text_str();
                if suppressions.iter().any(|re| re.is_match(text))
                    && commented_lines.insert(node.span.start_line)
                {
                    findings.push(Finding {
                        unit: scope_of(unit, id),
                        at: id,
                        severity: Severity::Medium,
                        description: format!("Suppression comment '{}'", text.trim()),
                    });
                }
            }
            NodeKind::Except if node.name.is_none() => findings.push(Finding {
                unit: scope_of(unit, id),
                at: id,
                severity: Severity::Medium,
                description: "Bare 'except:' swallows every error".to_string(),
            }),
            NodeKind::Call => {
                let name = node.name_str();
                let filter = matches!(
                    name,
                    "warnings.filterwarnings" | "warnings.simplefilter" | "filterwarnings" | "simplefilter"
                );
                let ignores = first_positional_arg(unit, id).is_some_and(|a| {
                    let arg = ast.node(a);
                    arg.kind == NodeKind::StringLiteral && arg.text_str() == "ignore"
                });
                if filter && ignores {
                    findings.push(Finding {
                        unit: scope_of(unit, id),
                        at: id,
                        severity: Severity::Medium,
                        description: format!("'{name}(\"ignore\")' hides warnings"),
                    });
                }
            }
            _ => {}
        }
    }

    (scope_units(unit), findings)
}
