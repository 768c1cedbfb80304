use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Location in source code
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Severity of a violation. Intrinsic to the producer, never policy-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Penalty used by the connascence score.
    pub fn penalty(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 5.0,
            Severity::Critical => 10.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "info" => Ok(Severity::Low),
            "medium" | "warning" | "warn" => Ok(Severity::Medium),
            "high" | "error" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(anyhow::anyhow!("unknown severity: {s}")),
        }
    }
}

/// Kind of violation. Exactly one per violation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    Position,
    Meaning,
    Algorithm,
    GodObject,
    Timing,
    Convention,
    Values,
    Execution,
    SafetyRule,
}

impl ViolationType {
    pub const ALL: [ViolationType; 9] = [
        ViolationType::Position,
        ViolationType::Meaning,
        ViolationType::Algorithm,
        ViolationType::GodObject,
        ViolationType::Timing,
        ViolationType::Convention,
        ViolationType::Values,
        ViolationType::Execution,
        ViolationType::SafetyRule,
    ];

    /// Key used in policy weight tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Position => "position",
            ViolationType::Meaning => "meaning",
            ViolationType::Algorithm => "algorithm",
            ViolationType::GodObject => "god_object",
            ViolationType::Timing => "timing",
            ViolationType::Convention => "convention",
            ViolationType::Values => "values",
            ViolationType::Execution => "execution",
            ViolationType::SafetyRule => "safety_rule",
        }
    }

    pub fn is_connascence(&self) -> bool {
        !matches!(self, ViolationType::SafetyRule)
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ViolationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViolationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown violation type: {s}"))
    }
}

/// A single finding. Built once by a detector or rule and never mutated;
/// weighting produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub rule_id: String,
    pub severity: Severity,
    pub weight: f64,
    pub location: SourceLocation,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

impl Violation {
    pub fn new(
        kind: ViolationType,
        rule_id: &str,
        severity: Severity,
        location: SourceLocation,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: violation_id(&location, rule_id),
            kind,
            rule_id: rule_id.to_string(),
            severity,
            weight: 1.0,
            location,
            description: description.into(),
            fix_hint: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    /// Copy of this violation carrying a policy weight.
    pub fn weighted(&self, weight: f64) -> Self {
        Self {
            weight,
            ..self.clone()
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    /// Severity penalty scaled by the policy weight.
    pub fn weighted_penalty(&self) -> f64 {
        self.weight * self.severity.penalty()
    }
}

/// Stable identifier: hash of file, rule and location.
pub fn violation_id(location: &SourceLocation, rule_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(location.file.to_string_lossy().replace('\\', "/").as_bytes());
    hasher.update(b"|");
    hasher.update(rule_id.as_bytes());
    hasher.update(format!("|{}|{}", location.line, location.column).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Category of a recovered error surfaced in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ReadError,
    ParseError,
    UnsupportedFile,
    DetectorFault,
    ResourceExhausted,
    PolicyFallback,
    Cancelled,
    Timeout,
    CacheError,
}

/// A recovered error. Partial success is always visible through these.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            detector: None,
            message: message.into(),
        }
    }

    pub fn for_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn for_detector(mut self, detector: impl fmt::Display) -> Self {
        self.detector = Some(detector.to_string());
        self
    }
}
