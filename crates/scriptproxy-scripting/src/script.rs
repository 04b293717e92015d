//! Script roles and immutable script versions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Compiled-in request gate: allow everything
pub const DEFAULT_REQUEST_SCRIPT: &str = "fn onRequest(req) { true }\n";

/// Compiled-in response rewriter: identity
pub const DEFAULT_RESPONSE_SCRIPT: &str = "fn onBodyResponse(body) { body }\n";

static NEXT_VERSION_ID: AtomicU64 = AtomicU64::new(1);

/// The two scripts an operator can supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptRole {
    /// Decides whether an intercepted request is forwarded
    RequestGate,
    /// Rewrites the body of intercepted HTML responses
    ResponseRewriter,
}

impl ScriptRole {
    /// Every role, in slot order
    pub const ALL: [ScriptRole; 2] = [ScriptRole::RequestGate, ScriptRole::ResponseRewriter];

    /// Name of the function the script must define
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::RequestGate => "onRequest",
            Self::ResponseRewriter => "onBodyResponse",
        }
    }

    /// Source used until a file is first loaded successfully
    pub fn default_source(&self) -> &'static str {
        match self {
            Self::RequestGate => DEFAULT_REQUEST_SCRIPT,
            Self::ResponseRewriter => DEFAULT_RESPONSE_SCRIPT,
        }
    }

    /// Short name used in logs and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestGate => "request",
            Self::ResponseRewriter => "response",
        }
    }

    /// Parse the short name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "request" | "request-gate" | "requestgate" => Some(Self::RequestGate),
            "response" | "response-rewriter" | "responserewriter" => Some(Self::ResponseRewriter),
            _ => None,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::RequestGate => 0,
            Self::ResponseRewriter => 1,
        }
    }
}

impl fmt::Display for ScriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a script version came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    /// Compiled-in default
    Default,
    /// Loaded from a file
    File(PathBuf),
}

impl fmt::Display for ScriptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("<default>"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One immutable revision of a role's script.
///
/// A reload produces a new version with a fresh `id`; versions are never
/// edited in place, so `id` is a sound cache key.
#[derive(Debug, Clone)]
pub struct ScriptVersion {
    id: u64,
    role: ScriptRole,
    source: Arc<str>,
    origin: ScriptOrigin,
    loaded_at: DateTime<Utc>,
}

impl ScriptVersion {
    fn new(role: ScriptRole, source: Arc<str>, origin: ScriptOrigin) -> Self {
        Self {
            id: NEXT_VERSION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            source,
            origin,
            loaded_at: Utc::now(),
        }
    }

    /// The compiled-in default version of a role
    pub fn default_for(role: ScriptRole) -> Self {
        Self::new(role, Arc::from(role.default_source()), ScriptOrigin::Default)
    }

    /// A version read from `path`
    pub fn from_file(role: ScriptRole, source: impl Into<Arc<str>>, path: impl AsRef<Path>) -> Self {
        Self::new(
            role,
            source.into(),
            ScriptOrigin::File(path.as_ref().to_path_buf()),
        )
    }

    /// Process-unique identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Role this version fills
    pub fn role(&self) -> ScriptRole {
        self.role
    }

    /// Script source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Entry point the source must define
    pub fn entry_point(&self) -> &'static str {
        self.role.entry_point()
    }

    /// Where the source came from
    pub fn origin(&self) -> &ScriptOrigin {
        &self.origin
    }

    /// Whether this is the compiled-in default
    pub fn is_default(&self) -> bool {
        self.origin == ScriptOrigin::Default
    }

    /// When this version was created
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
