use std::collections::BTreeSet;

use crate::ast::{NodeId, NodeKind, SourceUnit};
use crate::config::DetectorsConfig;
use crate::types::{Severity, Violation};

use super::{violation_at, DetectorKind};

/// Strings compared so commonly that flagging them is noise.
const IDIOMATIC_STRINGS: &[&str] = &["__main__"];

/// Unnamed literals whose meaning is only known by convention between the
/// comparison site and whatever produced the value.
#[derive(Debug, Clone)]
pub struct MeaningDetector {
    allowed_numbers: Vec<f64>,
    allowed_strings: BTreeSet<String>,
}

impl MeaningDetector {
    pub fn new(config: &DetectorsConfig) -> Self {
        let mut allowed_numbers = Vec::new();
        let mut allowed_strings = BTreeSet::new();
        for literal in &config.allowed_literals {
            match numeric_value(literal) {
                Some(v) => allowed_numbers.push(v),
                None => {
                    allowed_strings.insert(strip_quotes(literal).to_string());
                }
            }
        }
        Self {
            allowed_numbers,
            allowed_strings,
        }
    }

    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let ast = &unit.ast;
        let mut candidates: BTreeSet<NodeId> = BTreeSet::new();

        for id in ast.ids() {
            let node = ast.node(id);
            match node.kind {
                NodeKind::Comparison => {
                    candidates.extend(ast.children(id).filter(|&c| ast.node(c).kind.is_literal()));
                }
                NodeKind::Branch | NodeKind::Loop(_) => {
                    if let Some(cond) = ast.child_in_field(id, "condition") {
                        if ast.node(cond).kind.is_literal() {
                            candidates.insert(cond);
                        }
                    }
                }
                _ => {}
            }
        }

        candidates
            .into_iter()
            .filter_map(|id| self.check(unit, id))
            .collect()
    }

    fn check(&self, unit: &SourceUnit, id: NodeId) -> Option<Violation> {
        let node = unit.ast.node(id);
        let text = node.text_str();
        let (severity, label) = match node.kind {
            NodeKind::NumberLiteral => {
                let value = numeric_value(text)?;
                if self
                    .allowed_numbers
                    .iter()
                    .any(|a| (a - value).abs() < f64::EPSILON)
                {
                    return None;
                }
                (Severity::Medium, "number")
            }
            NodeKind::StringLiteral => {
                if self.allowed_strings.contains(text) || IDIOMATIC_STRINGS.contains(&text) {
                    return None;
                }
                (Severity::Low, "string")
            }
            _ => return None,
        };

        let shown = if label == "string" {
            format!("\"{text}\"")
        } else {
            text.to_string()
        };
        Some(
            violation_at(
                DetectorKind::Meaning,
                unit,
                id,
                severity,
                format!("Magic {label} {shown} used in a comparison or condition"),
            )
            .with_fix_hint("Replace the literal with a named constant or enum member")
            .with_metric("is_string", if label == "string" { 1.0 } else { 0.0 }),
        )
    }
}

fn strip_quotes(s: &str) -> &str {
    let trimmed = s.trim();
    for q in ["\"", "'"] {
        if let Some(inner) = trimmed.strip_prefix(q).and_then(|t| t.strip_suffix(q)) {
            return inner;
        }
    }
    trimmed
}

/// Numeric value of a literal, accepting underscores, radix prefixes and a
/// leading minus.
pub(crate) fn numeric_value(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, cleaned.clone()),
    };
    let lower = digits.to_lowercase();
    let value = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()? as f64
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()? as f64
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()? as f64
    } else {
        lower.trim_end_matches(['j', 'l']).parse::<f64>().ok()?
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_value_forms() {
        assert_eq!(numeric_value("42"), Some(42.0));
        assert_eq!(numeric_value("-1"), Some(-1.0));
        assert_eq!(numeric_value("1_000"), Some(1000.0));
        assert_eq!(numeric_value("0xff"), Some(255.0));
        assert_eq!(numeric_value("1.0"), Some(1.0));
        assert_eq!(numeric_value(""), None);
        assert_eq!(numeric_value("abc"), None);
    }

    #[test]
    fn test_allow_list_split() {
        let detector = MeaningDetector::new(&DetectorsConfig::default());
        assert_eq!(detector.allowed_numbers.len(), 3);
        assert!(detector.allowed_strings.contains(""));
    }
}
