//! # scriptproxy scripting
//!
//! Operator-authored traffic policy for a TLS-intercepting proxy.
//!
//! Two rhai scripts drive the filtering:
//!
//! - **request gate** - `fn onRequest(req)` returns `true` to forward a
//!   request or `false` to answer it with a fixed "blocked" response
//! - **response rewriter** - `fn onBodyResponse(body)` returns the new text of
//!   an HTML response body
//!
//! Both scripts are hot-reloaded from disk. A new file text is only accepted
//! after it compiles and defines its entry point, so a bad edit never disables
//! filtering: the last good version (or the compiled-in default) stays active.
//!
//! ## Layout
//!
//! - [`script`] - roles and immutable script versions
//! - [`engine`] / [`rhai_engine`] - the engine factory contract and its rhai backend
//! - [`store`] - the lock-free active script set
//! - [`cache`] - optional per-version engine reuse
//! - [`filter`] - typed request gate / response rewriter calls with fail-open handling
//! - [`reload`] - the file-watching reload supervisor
//! - [`hooks`] - the request/response interception entry points

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod reload;
pub mod rhai_engine;
pub mod script;
pub mod store;

pub use cache::{CacheStats, EngineCache};
pub use context::RequestDescriptor;
pub use engine::{EngineFactory, EngineInstance, EngineLimits};
pub use error::{Result, ScriptError};
pub use filter::ScriptFilter;
pub use hooks::{HookBody, TrafficHooks};
pub use reload::{ReloadEvent, ReloadOutcome, ReloadSupervisor, ScriptPaths};
pub use rhai_engine::RhaiEngineFactory;
pub use script::{ScriptOrigin, ScriptRole, ScriptVersion};
pub use store::{ActiveScriptSet, ScriptStore};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::engine::{EngineFactory, EngineInstance, EngineLimits};
    pub use crate::error::{Result, ScriptError};
    pub use crate::filter::ScriptFilter;
    pub use crate::hooks::TrafficHooks;
    pub use crate::reload::{ReloadSupervisor, ScriptPaths};
    pub use crate::rhai_engine::RhaiEngineFactory;
    pub use crate::script::{ScriptRole, ScriptVersion};
    pub use crate::store::ScriptStore;
}
