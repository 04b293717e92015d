//! Typed calls into the request gate and response rewriter scripts

use crate::cache::{CacheStats, EngineCache};
use crate::context::RequestDescriptor;
use crate::engine::{describe, EngineFactory, EngineInstance};
use crate::error::{Result, ScriptError};
use crate::script::{ScriptRole, ScriptVersion};
use crate::store::ScriptStore;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Invocation adapters over the active scripts.
///
/// Every call reads the role's current version from the [`ScriptStore`] at
/// call time. The infallible `evaluate_*` methods never block traffic because
/// of a script failure: the gate fails open and the rewriter returns its
/// input unchanged.
pub struct ScriptFilter {
    store: Arc<ScriptStore>,
    factory: Arc<dyn EngineFactory>,
    cache: Option<EngineCache>,
    verbose: bool,
}

impl ScriptFilter {
    /// Create a filter that reuses engines per script version
    pub fn new(store: Arc<ScriptStore>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            store,
            factory,
            cache: Some(EngineCache::new()),
            verbose: false,
        }
    }

    /// Build a fresh engine on every call instead of caching
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Log every decision at info level
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Script store this filter reads from
    pub fn store(&self) -> &Arc<ScriptStore> {
        &self.store
    }

    /// Engine cache statistics, if caching is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(EngineCache::stats)
    }

    /// Prime the cache with an engine already built for `version`
    pub fn prime(&self, version: &ScriptVersion, instance: Arc<dyn EngineInstance>) {
        if let Some(cache) = &self.cache {
            cache.insert(version, instance);
        }
    }

    fn engine_for(&self, version: &ScriptVersion) -> Result<Arc<dyn EngineInstance>> {
        match &self.cache {
            Some(cache) => cache.get_or_build(version, self.factory.as_ref()),
            None => self
                .factory
                .build(version.source(), version.entry_point()),
        }
    }

    /// Run the request gate; `true` means forward.
    pub fn try_evaluate_request_gate(&self, request: &RequestDescriptor) -> Result<bool> {
        let version = self.store.current(ScriptRole::RequestGate);
        let engine = self.engine_for(&version)?;

        match engine.invoke(request.to_value())? {
            Value::Bool(allowed) => Ok(allowed),
            other => Err(ScriptError::type_mismatch("bool", describe(&other))),
        }
    }

    /// Run the response rewriter on a body.
    pub fn try_evaluate_response_rewriter(&self, body: &str) -> Result<String> {
        let version = self.store.current(ScriptRole::ResponseRewriter);
        let engine = self.engine_for(&version)?;

        match engine.invoke(Value::String(body.to_string()))? {
            Value::String(rewritten) => Ok(rewritten),
            other => Err(ScriptError::type_mismatch("string", describe(&other))),
        }
    }

    /// Request gate with fail-open semantics
    pub fn evaluate_request_gate(&self, request: &RequestDescriptor) -> bool {
        match self.try_evaluate_request_gate(request) {
            Ok(allowed) => {
                if self.verbose {
                    info!(url = %request.url, allowed, "Request gate decision");
                } else {
                    debug!(url = %request.url, allowed, "Request gate decision");
                }
                allowed
            }
            Err(e) => {
                warn!(
                    role = %ScriptRole::RequestGate,
                    url = %request.url,
                    kind = e.kind(),
                    error = %e,
                    "Request script failed, allowing request"
                );
                true
            }
        }
    }

    /// Response rewriter that returns `body` unchanged on failure
    pub fn evaluate_response_rewriter(&self, body: &str) -> String {
        match self.try_evaluate_response_rewriter(body) {
            Ok(rewritten) => {
                if self.verbose {
                    info!(
                        before = body.len(),
                        after = rewritten.len(),
                        "Response body rewritten"
                    );
                } else {
                    debug!(
                        before = body.len(),
                        after = rewritten.len(),
                        "Response body rewritten"
                    );
                }
                rewritten
            }
            Err(e) => {
                warn!(
                    role = %ScriptRole::ResponseRewriter,
                    kind = e.kind(),
                    error = %e,
                    "Response script failed, body left unchanged"
                );
                body.to_string()
            }
        }
    }
}

impl fmt::Debug for ScriptFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFilter")
            .field("factory", &self.factory)
            .field("cached", &self.cache.is_some())
            .field("verbose", &self.verbose)
            .finish()
    }
}
