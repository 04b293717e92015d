//! Engine factory contract

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Builds executable script instances from source text.
///
/// `build` compiles the text in a fresh sandbox, runs its top-level
/// statements and resolves `entry_point` to a callable. It must not touch any
/// process-wide state, so concurrent builds need no coordination.
pub trait EngineFactory: Send + Sync + fmt::Debug {
    /// Compile `source` and resolve `entry_point`.
    ///
    /// Fails with [`ScriptError::Compile`](crate::ScriptError::Compile) or
    /// [`ScriptError::EntryPointMissing`](crate::ScriptError::EntryPointMissing).
    fn build(&self, source: &str, entry_point: &str) -> Result<Arc<dyn EngineInstance>>;
}

/// A script with its entry point resolved, ready to be called.
///
/// Arguments and results are JSON-like values so callers never see the
/// script runtime's own types.
pub trait EngineInstance: Send + Sync + fmt::Debug {
    /// Name of the resolved entry point
    fn entry_point(&self) -> &str;

    /// Call the entry point with a single argument
    fn invoke(&self, arg: Value) -> Result<Value>;
}

/// Sandbox limits applied to every script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Maximum number of operations per call
    pub max_operations: u64,
    /// Maximum string length in bytes
    pub max_string_size: usize,
    /// Maximum array length
    pub max_array_size: usize,
    /// Maximum object map size
    pub max_map_size: usize,
    /// Maximum function call nesting
    pub max_call_levels: usize,
    /// Maximum expression nesting at global level
    pub max_expr_depth: usize,
    /// Maximum expression nesting inside functions
    pub max_function_expr_depth: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            // Response bodies are passed as one string.
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
        }
    }
}

/// Short description of a JSON value's type, for type mismatch errors
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "()".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "map".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_limits_fit_large_bodies() {
        let limits = EngineLimits::default();
        assert!(limits.max_string_size >= 1024 * 1024);
        assert!(limits.max_operations > 0);
    }

    #[test]
    fn test_limits_deserialize_partial() {
        let limits: EngineLimits = serde_json::from_value(json!({ "max_operations": 10 })).unwrap();
        assert_eq!(limits.max_operations, 10);
        assert_eq!(limits.max_call_levels, EngineLimits::default().max_call_levels);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&json!(true)), "bool");
        assert_eq!(describe(&json!("x")), "string");
        assert_eq!(describe(&json!({})), "map");
    }
}
