use thiserror::Error as ThisError;

/// Broad class of a failure, matching the three stages a query passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The tree mixes operators of different query types.
    SyntaxCompatibility,
    /// Semantic failure detected before any storage I/O.
    Compilation,
    /// Storage call or named-filter callable failed.
    Execution,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyntaxCompatibility => "SyntaxCompatibilityError",
            Self::Compilation => "CompilationError",
            Self::Execution => "ExecutionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{}: {title}: {description}", .kind.as_str())]
pub struct MqlError {
    pub kind: ErrorKind,
    pub code: String,
    pub title: String,
    pub description: String,
}

impl MqlError {
    pub fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            title: title.into(),
            description: description.into(),
        }
    }

    /// Error raised by a store adapter. The compiler adds node context later.
    pub fn store(description: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Execution,
            "MQL_ERROR_STORE",
            "Store call failed",
            description,
        )
    }

    /// Error raised inside a named filter. The compiler adds the filter name.
    pub fn filter(description: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Execution,
            "MQL_ERROR_FILTER",
            "Filter failed",
            description,
        )
    }

    pub fn is_compilation(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Compilation | ErrorKind::SyntaxCompatibility
        )
    }
}
