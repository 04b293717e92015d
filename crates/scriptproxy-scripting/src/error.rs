//! Script error types

use std::path::{Path, PathBuf};

/// Script result type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Script error
///
/// Every kind is recovered where it happens: reloads keep the previous
/// version, live calls fall back to pass-through.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// The script file could not be read
    #[error("Failed to read script file {}: {message}", .path.display())]
    FileRead {
        /// File that was being read
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Script parsing or top-level evaluation failed
    #[error("Script compilation error: {message}{}", format_position(.line, .column))]
    Compile {
        /// Error message
        message: String,
        /// Line number if available
        line: Option<usize>,
        /// Column number if available
        column: Option<usize>,
    },

    /// The required entry point is not defined by the script
    #[error("Function {name} not found in script: {reason}")]
    EntryPointMissing {
        /// Entry point name
        name: String,
        /// Why the lookup failed
        reason: String,
    },

    /// The entry point failed during a live call
    #[error("Script runtime error: {message}{}", format_position(.line, &None))]
    Runtime {
        /// Error message
        message: String,
        /// Script line where the error occurred
        line: Option<usize>,
    },

    /// The entry point returned a value of the wrong type
    #[error("Script type error: expected {expected}, got {found}")]
    TypeMismatch {
        /// Expected type
        expected: &'static str,
        /// Actual value description
        found: String,
    },
}

fn format_position(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(col)) => format!(" at line {line}, column {col}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

impl ScriptError {
    /// Create a file read error
    pub fn file_read(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Create a compilation error without position
    pub fn compile<S: Into<String>>(message: S) -> Self {
        Self::Compile {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Create an entry point missing error
    pub fn entry_point_missing<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::EntryPointMissing {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a runtime error without position
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
            line: None,
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.into(),
        }
    }

    /// Whether this error makes a reload reject the new file
    pub fn is_reload_rejection(&self) -> bool {
        matches!(
            self,
            Self::FileRead { .. } | Self::Compile { .. } | Self::EntryPointMissing { .. }
        )
    }

    /// Short machine-friendly kind name, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileRead { .. } => "file_read",
            Self::Compile { .. } => "compile",
            Self::EntryPointMissing { .. } => "entry_point_missing",
            Self::Runtime { .. } => "runtime",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        let pos = err.1;
        Self::Compile {
            message: err.0.to_string(),
            line: pos.line(),
            column: pos.position(),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        let line = err.position().line();
        Self::Runtime {
            message: err.to_string(),
            line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_rejection_kinds() {
        assert!(ScriptError::file_read("request.rhai", "gone").is_reload_rejection());
        assert!(ScriptError::compile("bad token").is_reload_rejection());
        assert!(ScriptError::entry_point_missing("onRequest", "not defined").is_reload_rejection());
        assert!(!ScriptError::runtime("boom").is_reload_rejection());
        assert!(!ScriptError::type_mismatch("bool", "string").is_reload_rejection());
    }

    #[test]
    fn test_error_display() {
        let err = ScriptError::Compile {
            message: "unexpected '}'".to_string(),
            line: Some(3),
            column: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "Script compilation error: unexpected '}' at line 3, column 7"
        );

        let err = ScriptError::entry_point_missing("onRequest", "not defined");
        assert_eq!(
            err.to_string(),
            "Function onRequest not found in script: not defined"
        );

        let err = ScriptError::file_read("/tmp/request.rhai", "No such file");
        assert!(err.to_string().contains("/tmp/request.rhai"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let engine = rhai::Engine::new();
        let err: ScriptError = engine.compile("fn broken( {").unwrap_err().into();
        match err {
            ScriptError::Compile { line, .. } => assert_eq!(line, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
