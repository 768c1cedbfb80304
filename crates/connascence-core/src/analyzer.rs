use std::path::Path;

use crate::ast::SourceUnit;
use crate::error::AnalysisError;

/// Trait that each language adapter must implement.
pub trait LanguageAdapter: Send + Sync {
    /// Language name (e.g., "python")
    fn language(&self) -> &'static str;

    /// File extensions this adapter handles (e.g., &["py"])
    fn file_extensions(&self) -> &[&str];

    /// Parse a source file into a normalized [`SourceUnit`].
    ///
    /// Returns [`AnalysisError::Parse`] when the file cannot be parsed.
    fn parse(&self, path: &Path, content: &str) -> Result<SourceUnit, AnalysisError>;

    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| self.file_extensions().iter().any(|e| ext == *e))
    }
}
