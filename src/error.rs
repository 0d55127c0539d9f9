//! Error types for docsel.

use std::fmt;

use thiserror::Error;

/// Reason tag carried by every compilation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The text could not be parsed.
    Unparseable,
    /// A node, operator, callee or comprehension shape that has no SQL lowering.
    Unsupported,
    /// A value of the wrong kind reached a compilation step.
    ShapeMismatch,
    /// The decompiler finished with a malformed value stack.
    StackImbalance,
    /// A closure (or lambda text) that declares parameters.
    ParameterizedClosure,
    /// Configuration, database or IO failure outside the compiler.
    Environment,
}

/// Failure modes of the stack-machine decompiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompileFailure {
    /// The value stack did not hold exactly one value at the end of the walk.
    StackImbalance,
    /// The closure declares parameters.
    Parameterized,
}

impl fmt::Display for DecompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecompileFailure::StackImbalance => write!(f, "stack imbalance"),
            DecompileFailure::Parameterized => write!(f, "closure declares parameters"),
        }
    }
}

/// The main error type for docsel operations.
#[derive(Debug, Error)]
pub enum SelectError {
    /// Unparseable expression text.
    #[error("Syntax error in '{fragment}': {message}")]
    Syntax { fragment: String, message: String },

    /// Unknown node, operator, callee or comprehension shape.
    #[error("Unsupported construct '{fragment}': {reason}")]
    Unsupported { fragment: String, reason: String },

    /// Wrong-kind value at a compilation step.
    #[error("Shape error in '{fragment}': {reason}")]
    Shape { fragment: String, reason: String },

    /// Decompilation failed.
    #[error("Decompilation error ({kind}): {detail}")]
    Decompilation {
        kind: DecompileFailure,
        detail: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SelectError {
    /// Create a syntax error for the given fragment.
    pub fn syntax(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported-construct error.
    pub fn unsupported(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    /// Create a shape error.
    pub fn shape(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Shape {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    /// Create a decompilation error.
    pub fn decompile(kind: DecompileFailure, detail: impl Into<String>) -> Self {
        Self::Decompilation {
            kind,
            detail: detail.into(),
        }
    }

    /// The reason tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SelectError::Syntax { .. } => ErrorKind::Unparseable,
            SelectError::Unsupported { .. } => ErrorKind::Unsupported,
            SelectError::Shape { .. } => ErrorKind::ShapeMismatch,
            SelectError::Decompilation {
                kind: DecompileFailure::StackImbalance,
                ..
            } => ErrorKind::StackImbalance,
            SelectError::Decompilation {
                kind: DecompileFailure::Parameterized,
                ..
            } => ErrorKind::ParameterizedClosure,
            SelectError::Config(_) | SelectError::Database(_) | SelectError::Io(_) => {
                ErrorKind::Environment
            }
        }
    }

    /// The offending text or sub-expression, when there is one.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            SelectError::Syntax { fragment, .. }
            | SelectError::Unsupported { fragment, .. }
            | SelectError::Shape { fragment, .. } => Some(fragment),
            SelectError::Decompilation { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

/// Result type alias for docsel operations.
pub type SelectResult<T> = Result<T, SelectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SelectError::unsupported("count", "unknown callable");
        assert_eq!(
            err.to_string(),
            "Unsupported construct 'count': unknown callable"
        );
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.fragment(), Some("count"));
    }

    #[test]
    fn test_decompile_kinds() {
        let err = SelectError::decompile(DecompileFailure::Parameterized, "lambda x: x");
        assert_eq!(err.kind(), ErrorKind::ParameterizedClosure);
        assert_eq!(
            err.to_string(),
            "Decompilation error (closure declares parameters): lambda x: x"
        );

        let err = SelectError::decompile(DecompileFailure::StackImbalance, "2 values left");
        assert_eq!(err.kind(), ErrorKind::StackImbalance);
    }
}
