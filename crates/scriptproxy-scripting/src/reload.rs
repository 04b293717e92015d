//! Hot reload of the script files

use crate::engine::EngineFactory;
use crate::error::{Result, ScriptError};
use crate::filter::ScriptFilter;
use crate::script::{ScriptRole, ScriptVersion};
use crate::store::ScriptStore;
use chrono::{DateTime, Utc};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use scriptproxy_runtime::ShutdownListener;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Default request script file name
pub const REQUEST_FILE: &str = "request.rhai";

/// Default response script file name
pub const RESPONSE_FILE: &str = "response.rhai";

/// Locations of the two script files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPaths {
    /// Request gate script
    pub request: PathBuf,
    /// Response rewriter script
    pub response: PathBuf,
}

impl ScriptPaths {
    /// Script files with the default names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            request: dir.join(REQUEST_FILE),
            response: dir.join(RESPONSE_FILE),
        }
    }

    /// File holding the script of `role`
    pub fn path(&self, role: ScriptRole) -> &Path {
        match role {
            ScriptRole::RequestGate => &self.request,
            ScriptRole::ResponseRewriter => &self.response,
        }
    }

    /// Role whose file is `path`, if any.
    ///
    /// Compares file names and canonical parent directories, so the
    /// absolute paths reported by the OS watcher match relative
    /// configured paths.
    pub fn role_for(&self, path: &Path) -> Option<ScriptRole> {
        ScriptRole::ALL
            .into_iter()
            .find(|role| same_file(self.path(*role), path))
    }

    /// Directories to watch
    fn watch_dirs(&self) -> BTreeSet<PathBuf> {
        ScriptRole::ALL
            .iter()
            .map(|role| normalized_parent(self.path(*role)))
            .collect()
    }
}

impl Default for ScriptPaths {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

fn normalized_parent(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf())
}

fn same_file(configured: &Path, event: &Path) -> bool {
    if configured == event {
        return true;
    }
    configured.file_name().is_some()
        && configured.file_name() == event.file_name()
        && normalized_parent(configured) == normalized_parent(event)
}

/// Result of one reload attempt
#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    /// The new text validated and is now active
    Accepted {
        /// Id of the new version
        version_id: u64,
    },
    /// The file holds the text that is already active
    Unchanged,
    /// The new text was refused; the previous version stays active
    Rejected {
        /// Why it was refused
        error: ScriptError,
    },
}

impl ReloadOutcome {
    /// Whether the store now holds a new version
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Whether the new text was refused
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Script reload event
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// Script role
    pub role: ScriptRole,

    /// File that was read
    pub path: PathBuf,

    /// What happened
    pub outcome: ReloadOutcome,

    /// Timestamp of the reload
    pub timestamp: DateTime<Utc>,
}

/// Watches the script files and swaps validated versions into the store.
///
/// Per file the cycle is: change notification, validate the new text with
/// the engine factory, then either accept (replace the store entry) or
/// reject (log and keep the active version). Nothing is retried; the next
/// write to the file triggers the next attempt.
#[derive(Debug)]
pub struct ReloadSupervisor {
    store: Arc<ScriptStore>,
    factory: Arc<dyn EngineFactory>,
    filter: Option<Arc<ScriptFilter>>,
    paths: ScriptPaths,
    poll_interval: Duration,
    events: broadcast::Sender<ReloadEvent>,
}

impl ReloadSupervisor {
    /// Create a supervisor for the files in `paths`
    pub fn new(store: Arc<ScriptStore>, factory: Arc<dyn EngineFactory>, paths: ScriptPaths) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            factory,
            filter: None,
            paths,
            poll_interval: Duration::from_secs(2),
            events,
        }
    }

    /// Hand validated engines to `filter` so the first call after a reload
    /// does not compile again
    pub fn with_filter(mut self, filter: Arc<ScriptFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Poll interval for platforms without native change notification
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Watched script files
    pub fn paths(&self) -> &ScriptPaths {
        &self.paths
    }

    /// Subscribe to reload outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    /// Load both files at startup.
    ///
    /// A missing file is expected (the default stays active) and is only
    /// logged at info level.
    pub async fn load_initial(&self) {
        for role in ScriptRole::ALL {
            let path = self.paths.path(role);
            if !path.exists() {
                info!(
                    role = %role,
                    path = %path.display(),
                    "Script file not found, using default script"
                );
                continue;
            }
            self.reload(role).await;
        }
    }

    /// Read, validate and possibly accept the file of `role`
    pub async fn reload(&self, role: ScriptRole) -> ReloadEvent {
        let path = self.paths.path(role).to_path_buf();
        trace!(role = %role, path = %path.display(), "Validating script");

        let outcome = match self.validate(role, &path).await {
            Ok(None) => {
                debug!(role = %role, path = %path.display(), "Script unchanged");
                ReloadOutcome::Unchanged
            }
            Ok(Some(version_id)) => {
                info!(
                    role = %role,
                    path = %path.display(),
                    version_id,
                    "Script reloaded"
                );
                ReloadOutcome::Accepted { version_id }
            }
            Err(e) => {
                error!(
                    role = %role,
                    path = %path.display(),
                    kind = e.kind(),
                    error = %e,
                    "Script loading error, keeping active version"
                );
                ReloadOutcome::Rejected { error: e }
            }
        };

        let event = ReloadEvent {
            role,
            path,
            outcome,
            timestamp: Utc::now(),
        };
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        event
    }

    async fn validate(&self, role: ScriptRole, path: &Path) -> Result<Option<u64>> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScriptError::file_read(path, e))?;

        if self.store.current(role).source() == source {
            return Ok(None);
        }

        let instance = self.factory.build(&source, role.entry_point())?;

        let version = ScriptVersion::from_file(role, source, path);
        let version_id = version.id();
        if let Some(filter) = &self.filter {
            filter.prime(&version, instance);
        }
        self.store.replace(version);

        Ok(Some(version_id))
    }

    /// Whether an event should trigger a reload
    fn should_process_event(event: &Event) -> bool {
        match event.kind {
            EventKind::Modify(ModifyKind::Metadata(_)) => false,
            EventKind::Modify(_) | EventKind::Create(_) => true,
            _ => false,
        }
    }

    /// Roles affected by an event, each at most once
    fn roles_for_event(&self, event: &Event) -> Vec<ScriptRole> {
        let mut roles = Vec::new();
        for path in &event.paths {
            if let Some(role) = self.paths.role_for(path) {
                if !roles.contains(&role) {
                    roles.push(role);
                }
            }
        }
        roles
    }

    /// Handle one watcher event
    pub async fn handle_event(&self, event: Event) {
        if !Self::should_process_event(&event) {
            trace!(kind = ?event.kind, "Ignoring file event");
            return;
        }

        for role in self.roles_for_event(&event) {
            info!(role = %role, "Reloading: {}", self.paths.path(role).display());
            self.reload(role).await;
        }
    }

    /// Consume watcher events until the channel closes or shutdown fires
    pub async fn run(
        &self,
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        mut shutdown: ShutdownListener,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Script reload supervisor stopping on shutdown");
                    break;
                }
                next = rx.recv() => match next {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => warn!(error = %e, "File watcher error"),
                    None => {
                        debug!("File watcher channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Create an OS watcher on the script directories.
    ///
    /// The watcher must be kept alive for events to keep flowing.
    pub fn watch(
        &self,
    ) -> io::Result<(
        RecommendedWatcher,
        mpsc::UnboundedReceiver<notify::Result<Event>>,
    )> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(self.poll_interval),
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        for dir in self.paths.watch_dirs() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::Other,
                        format!("Failed to watch {}: {}", dir.display(), e),
                    )
                })?;
            debug!(dir = %dir.display(), "Watching script directory");
        }

        Ok((watcher, rx))
    }

    /// Start watching and run the event loop on a background task
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownListener) -> io::Result<JoinHandle<()>> {
        let (watcher, rx) = self.watch()?;

        info!(
            request = %self.paths.request.display(),
            response = %self.paths.response.display(),
            "Script reload supervisor started"
        );

        Ok(tokio::spawn(async move {
            // Dropping the watcher stops notifications.
            let _watcher = watcher;
            self.run(rx, shutdown).await;
        }))
    }
}
