pub mod aggregate;
pub mod analyzer;
pub mod ast;
pub mod cache;
pub mod config;
pub mod detectors;
pub mod duplication;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod recommend;
pub mod rules;
pub mod types;

pub use aggregate::{AnalysisReport, QualityGate, Summary};
pub use analyzer::LanguageAdapter;
pub use ast::{Ast, AstNode, NodeId, NodeKind, SourceUnit, Token, TokenClass};
pub use config::Config;
pub use detectors::{Detector, DetectorKind};
pub use duplication::DuplicationCluster;
pub use error::AnalysisError;
pub use pipeline::{AnalysisPipeline, AnalysisRequest, CancellationToken};
pub use policy::{FlatPolicy, PolicyRegistry, ThresholdOverrides};
pub use pool::{DetectorPool, PoolStats};
pub use recommend::{recommend, summarize, Recommendation, RecommendationGroup};
pub use rules::{RuleEngine, RuleId};
pub use types::*;
