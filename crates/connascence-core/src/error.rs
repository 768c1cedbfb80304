use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::detectors::DetectorKind;

/// Errors raised by the analysis engine.
///
/// Configuration-class errors are fatal and abort a run before any file is
/// read. The per-file classes are recovered by the pipeline and surface as
/// report diagnostics.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cyclic policy inheritance: {}", .cycle.join(" -> "))]
    CyclicPolicy { cycle: Vec<String> },

    #[error("policy '{policy}' extends unknown base '{base}'")]
    UnknownPolicyBase { policy: String, base: String },

    #[error("unknown detector type '{0}'")]
    UnknownDetector(String),

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("detector {detector} faulted on {}: {message}", .path.display())]
    DetectorFault {
        detector: DetectorKind,
        path: PathBuf,
        message: String,
    },

    #[error("no {kind} detector available after waiting {waited:?}")]
    ResourceExhausted { kind: DetectorKind, waited: Duration },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnalysisError {
    /// True for the classes that abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AnalysisError::Configuration(_)
                | AnalysisError::CyclicPolicy { .. }
                | AnalysisError::UnknownPolicyBase { .. }
                | AnalysisError::UnknownDetector(_)
        )
    }
}
