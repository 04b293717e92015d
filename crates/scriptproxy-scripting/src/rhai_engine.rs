//! Rhai engine factory

use crate::engine::{EngineFactory, EngineInstance, EngineLimits};
use crate::error::{Result, ScriptError};
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const SCRIPT_LOG_TARGET: &str = "scriptproxy::script";

/// Builds [`EngineInstance`]s backed by rhai.
///
/// The underlying `rhai::Engine` (registered functions and limits) is built
/// once and only ever read afterwards; each instance compiles into its own
/// `AST` and each call runs in its own `Scope`.
#[derive(Clone)]
pub struct RhaiEngineFactory {
    engine: Arc<Engine>,
    limits: EngineLimits,
}

impl RhaiEngineFactory {
    /// Create a factory with default limits
    pub fn new() -> Self {
        Self::with_limits(EngineLimits::default())
    }

    /// Create a factory with custom sandbox limits
    pub fn with_limits(limits: EngineLimits) -> Self {
        let mut engine = Engine::new();

        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);

        // Scripts must not build code at runtime.
        engine.disable_symbol("eval");

        Self::register_functions(&mut engine);

        Self {
            engine: Arc::new(engine),
            limits,
        }
    }

    /// Limits this factory applies
    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    /// Route script output to tracing
    fn register_functions(engine: &mut Engine) {
        engine.on_print(|text| {
            info!(target: SCRIPT_LOG_TARGET, "{}", text);
        });

        engine.on_debug(|text, source, pos| {
            debug!(
                target: SCRIPT_LOG_TARGET,
                source = source.unwrap_or("script"),
                line = pos.line(),
                "{}",
                text
            );
        });

        engine.register_fn("log_debug", |msg: &str| {
            debug!(target: SCRIPT_LOG_TARGET, script_log = msg);
        });

        engine.register_fn("log_info", |msg: &str| {
            info!(target: SCRIPT_LOG_TARGET, script_log = msg);
        });

        engine.register_fn("log_warn", |msg: &str| {
            warn!(target: SCRIPT_LOG_TARGET, script_log = msg);
        });
    }

    /// Check that `ast` defines `name` as a one-argument function
    fn resolve_entry_point(ast: &AST, name: &str) -> Result<()> {
        let arities: Vec<usize> = ast
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| f.params.len())
            .collect();

        if arities.contains(&1) {
            return Ok(());
        }

        let reason = match arities.first() {
            None => "not defined".to_string(),
            Some(n) => format!("defined with {} parameters, expected 1", n),
        };
        Err(ScriptError::entry_point_missing(name, reason))
    }
}

impl Default for RhaiEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RhaiEngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiEngineFactory")
            .field("limits", &self.limits)
            .finish()
    }
}

impl EngineFactory for RhaiEngineFactory {
    fn build(&self, source: &str, entry_point: &str) -> Result<Arc<dyn EngineInstance>> {
        let ast = self.engine.compile(source)?;

        // Top-level statements must run cleanly too.
        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| {
                let pos = e.position();
                ScriptError::Compile {
                    message: e.to_string(),
                    line: pos.line(),
                    column: pos.position(),
                }
            })?;

        Self::resolve_entry_point(&ast, entry_point)?;

        trace!(entry_point, "Script compiled");

        Ok(Arc::new(RhaiEngineInstance {
            engine: Arc::clone(&self.engine),
            ast,
            entry_point: entry_point.to_string(),
        }))
    }
}

/// A compiled rhai script with a resolved entry point
pub struct RhaiEngineInstance {
    engine: Arc<Engine>,
    ast: AST,
    entry_point: String,
}

impl fmt::Debug for RhaiEngineInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiEngineInstance")
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

impl EngineInstance for RhaiEngineInstance {
    fn entry_point(&self) -> &str {
        &self.entry_point
    }

    fn invoke(&self, arg: Value) -> Result<Value> {
        let arg = rhai::serde::to_dynamic(&arg)?;

        // call_fn re-runs the top-level statements in this scope first, which
        // makes global constants visible to the entry point.
        let mut scope = Scope::new();
        let result: Dynamic = self
            .engine
            .call_fn(&mut scope, &self.ast, &self.entry_point, (arg,))?;

        let value: Value = rhai::serde::from_dynamic(&result)?;
        Ok(value)
    }
}
