//! Connascence detectors.
//!
//! The detector set is closed: [`DetectorKind`] enumerates every detector and
//! [`Detector`] is the matching tagged variant. Detectors hold only their
//! configuration, so `analyze` is a pure function of the source unit and an
//! instance can be reused for any number of files.

pub mod algorithm;
pub mod convention;
pub mod execution;
pub mod god_object;
pub mod meaning;
pub mod position;
pub mod timing;
pub mod values;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::SourceUnit;
use crate::config::DetectorsConfig;
use crate::error::AnalysisError;
use crate::types::{Violation, ViolationType};

pub use algorithm::AlgorithmDetector;
pub use convention::ConventionDetector;
pub use execution::ExecutionDetector;
pub use god_object::GodObjectDetector;
pub use meaning::MeaningDetector;
pub use position::PositionDetector;
pub use timing::TimingDetector;
pub use values::ValuesDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Position,
    Meaning,
    Algorithm,
    Identity,
    Timing,
    Convention,
    Values,
    Execution,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 8] = [
        DetectorKind::Position,
        DetectorKind::Meaning,
        DetectorKind::Algorithm,
        DetectorKind::Identity,
        DetectorKind::Timing,
        DetectorKind::Convention,
        DetectorKind::Values,
        DetectorKind::Execution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Position => "position",
            DetectorKind::Meaning => "meaning",
            DetectorKind::Algorithm => "algorithm",
            DetectorKind::Identity => "identity",
            DetectorKind::Timing => "timing",
            DetectorKind::Convention => "convention",
            DetectorKind::Values => "values",
            DetectorKind::Execution => "execution",
        }
    }

    pub fn violation_type(&self) -> ViolationType {
        match self {
            DetectorKind::Position => ViolationType::Position,
            DetectorKind::Meaning => ViolationType::Meaning,
            DetectorKind::Algorithm => ViolationType::Algorithm,
            DetectorKind::Identity => ViolationType::GodObject,
            DetectorKind::Timing => ViolationType::Timing,
            DetectorKind::Convention => ViolationType::Convention,
            DetectorKind::Values => ViolationType::Values,
            DetectorKind::Execution => ViolationType::Execution,
        }
    }

    pub fn rule_id(&self) -> &'static str {
        match self {
            DetectorKind::Position => "connascence_of_position",
            DetectorKind::Meaning => "connascence_of_meaning",
            DetectorKind::Algorithm => "connascence_of_algorithm",
            DetectorKind::Identity => "god_object",
            DetectorKind::Timing => "connascence_of_timing",
            DetectorKind::Convention => "connascence_of_convention",
            DetectorKind::Values => "connascence_of_values",
            DetectorKind::Execution => "connascence_of_execution",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let key = match key.as_str() {
            "god_object" | "god-object" => "identity",
            other => other,
        };
        DetectorKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| AnalysisError::UnknownDetector(s.to_string()))
    }
}

/// A configured detector instance.
#[derive(Debug, Clone)]
pub enum Detector {
    Position(PositionDetector),
    Meaning(MeaningDetector),
    Algorithm(AlgorithmDetector),
    Identity(GodObjectDetector),
    Timing(TimingDetector),
    Convention(ConventionDetector),
    Values(ValuesDetector),
    Execution(ExecutionDetector),
}

impl Detector {
    pub fn new(kind: DetectorKind, config: &DetectorsConfig) -> Self {
        match kind {
            DetectorKind::Position => Detector::Position(PositionDetector::new(config)),
            DetectorKind::Meaning => Detector::Meaning(MeaningDetector::new(config)),
            DetectorKind::Algorithm => Detector::Algorithm(AlgorithmDetector::new(config)),
            DetectorKind::Identity => Detector::Identity(GodObjectDetector::new(config)),
            DetectorKind::Timing => Detector::Timing(TimingDetector),
            DetectorKind::Convention => Detector::Convention(ConventionDetector),
            DetectorKind::Values => Detector::Values(ValuesDetector),
            DetectorKind::Execution => Detector::Execution(ExecutionDetector),
        }
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            Detector::Position(_) => DetectorKind::Position,
            Detector::Meaning(_) => DetectorKind::Meaning,
            Detector::Algorithm(_) => DetectorKind::Algorithm,
            Detector::Identity(_) => DetectorKind::Identity,
            Detector::Timing(_) => DetectorKind::Timing,
            Detector::Convention(_) => DetectorKind::Convention,
            Detector::Values(_) => DetectorKind::Values,
            Detector::Execution(_) => DetectorKind::Execution,
        }
    }

    /// Violations for one unit, in deterministic order.
    pub fn analyze(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut violations = match self {
            Detector::Position(d) => d.analyze(unit),
            Detector::Meaning(d) => d.analyze(unit),
            Detector::Algorithm(d) => d.analyze(unit),
            Detector::Identity(d) => d.analyze(unit),
            Detector::Timing(d) => d.analyze(unit),
            Detector::Convention(d) => d.analyze(unit),
            Detector::Values(d) => d.analyze(unit),
            Detector::Execution(d) => d.analyze(unit),
        };
        violations.sort_by(|a, b| {
            (a.location.line, a.location.column, &a.id).cmp(&(
                b.location.line,
                b.location.column,
                &b.id,
            ))
        });
        violations
    }
}

/// Build a violation for `kind` at node `id`.
pub(crate) fn violation_at(
    kind: DetectorKind,
    unit: &SourceUnit,
    id: crate::ast::NodeId,
    severity: crate::types::Severity,
    description: String,
) -> Violation {
    Violation::new(
        kind.violation_type(),
        kind.rule_id(),
        severity,
        unit.location_of(id),
        description,
    )
}

/// Last segment of a dotted name (`time.sleep` -> `sleep`).
pub(crate) fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_kind_parse() {
        assert_eq!("position".parse::<DetectorKind>().unwrap(), DetectorKind::Position);
        assert_eq!("god-object".parse::<DetectorKind>().unwrap(), DetectorKind::Identity);
        assert!(matches!(
            "telepathy".parse::<DetectorKind>(),
            Err(AnalysisError::UnknownDetector(_))
        ));
    }

    #[test]
    fn test_every_kind_constructs_matching_variant() {
        let config = DetectorsConfig::default();
        for kind in DetectorKind::ALL {
            assert_eq!(Detector::new(kind, &config).kind(), kind);
        }
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("time.sleep"), "sleep");
        assert_eq!(last_segment("sleep"), "sleep");
    }
}
