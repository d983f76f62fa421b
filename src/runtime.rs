//! Runtime Context
//!
//! All mutable interpreter state for one bundle execution lives in a single
//! [`RuntimeContext`] shared behind an `Arc`: the variable and function
//! tables, the loaded-file set, declared APIs, server status, schedules and
//! external connections. Request handlers and timers reach the same state
//! through that `Arc`, so every table sits behind its own lock.
//!
//! ```text
//! bundle bytes ──► decode ──► Workspace (temp dir) ──► RuntimeContext
//!                                                        │
//!                                  main file ──► interpreter (parse + run)
//!                                                        │
//!                         listeners / schedules? ── yes ─► wait for signal
//!                                                        │ no
//!                                                        ▼
//!                                             grace delay ─► shutdown
//! ```

use crate::bundle::{self, FileMap};
use crate::datafile::DataStore;
use crate::error::RuntimeResult;
use crate::manifest::{DEFAULT_MAIN, ProjectManifest};
use crate::parser::Action;
use crate::routes::ApiRegistry;
use crate::workspace::Workspace;
use host_bridge::{FsBridge, QueryBackend, SysBridge};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Directory packages are installed under inside a bundle
pub const PACKAGES_DIR: &str = "tont-packets";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Entry file; when `None` it comes from `tontoo.json`, else `Main.tont`
    pub main_file: Option<String>,
    /// Packages directory inside the bundle
    pub packages_dir: String,
    /// Delay before cleanup when nothing keeps the process alive
    pub idle_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            main_file: None,
            packages_dir: PACKAGES_DIR.to_string(),
            idle_grace: Duration::from_secs(1),
        }
    }
}

impl RuntimeConfig {
    pub fn with_main_file(mut self, main: impl Into<String>) -> Self {
        self.main_file = Some(main.into());
        self
    }

    pub fn with_packages_dir(mut self, dir: impl Into<String>) -> Self {
        self.packages_dir = dir.into();
        self
    }

    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }
}

/// Lifecycle of a declared web server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// HTTP listener bound to this address
    Listening(SocketAddr),
    Failed,
}

/// Shared state of one bundle execution
pub struct RuntimeContext {
    pub(crate) config: RuntimeConfig,
    /// Source files of the bundle, keyed by relative path
    pub(crate) sources: FileMap,
    pub(crate) fs: FsBridge,
    pub(crate) sys: SysBridge,
    pub(crate) data: Arc<DataStore>,
    pub(crate) apis: ApiRegistry,
    variables: RwLock<HashMap<String, String>>,
    functions: RwLock<HashMap<String, Arc<Vec<Action>>>>,
    loaded: Mutex<HashSet<String>>,
    servers: RwLock<HashMap<String, ServerStatus>>,
    connections: RwLock<HashMap<String, Arc<dyn QueryBackend>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Listeners and schedules currently keeping the process alive
    active: AtomicUsize,
}

impl RuntimeContext {
    /// Create a context over `files` materialized at `root`
    pub fn new(files: &FileMap, root: &Path, config: RuntimeConfig) -> Self {
        let sources = files
            .iter()
            .filter(|(path, _)| bundle::is_source_path(path))
            .map(|(path, text)| (path.clone(), text.clone()))
            .collect();
        let fs = FsBridge::with_sandbox(root);

        Self {
            config,
            sources,
            sys: SysBridge::new(root),
            data: Arc::new(DataStore::new(fs.clone())),
            fs,
            apis: ApiRegistry::new(),
            variables: RwLock::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
            loaded: Mutex::new(HashSet::new()),
            servers: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
        }
    }

    pub fn workspace(&self) -> &Path {
        self.fs.root()
    }

    pub fn has_source(&self, path: &str) -> bool {
        self.sources.contains_key(path)
    }

    /// Source paths in bundle order
    pub fn source_paths(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    // =========================================
    // VARIABLES
    // =========================================

    /// Store a variable. The value is kept raw; substitution happens on use.
    pub fn set_variable(&self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.write().insert(key.into(), value.into());
    }

    pub fn variable(&self, key: &str) -> Option<String> {
        self.variables.read().get(key).cloned()
    }

    /// Replace every `$NAME` (`NAME` of `A-Z`, `0-9`, `_`) with the variable's
    /// value, or nothing if it is undefined. Substituted text is not scanned
    /// again.
    pub fn substitute(&self, text: &str) -> String {
        substitute_with(text, &self.variables.read())
    }

    // =========================================
    // FUNCTIONS
    // =========================================

    pub fn define_function(&self, name: impl Into<String>, body: Vec<Action>) {
        let name = name.into();
        debug!("Defined function {} ({} actions)", name, body.len());
        self.functions.write().insert(name, Arc::new(body));
    }

    pub fn function(&self, name: &str) -> Option<Arc<Vec<Action>>> {
        self.functions.read().get(name).cloned()
    }

    /// Record `path` as loaded; false if it already was
    pub fn mark_loaded(&self, path: &str) -> bool {
        self.loaded.lock().insert(path.to_string())
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        self.loaded.lock().contains(path)
    }

    // =========================================
    // SERVERS, SCHEDULES, CONNECTIONS
    // =========================================

    pub fn set_server_status(&self, id: &str, status: ServerStatus) {
        self.servers.write().insert(id.to_string(), status);
    }

    pub fn server_status(&self, id: &str) -> Option<ServerStatus> {
        self.servers.read().get(id).copied()
    }

    /// Track a long-running listener or schedule
    pub(crate) fn keep_alive(&self, task: JoinHandle<()>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().push(task);
    }

    /// True while a listener or schedule is active
    pub fn keeps_alive(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    pub fn add_connection(&self, handle: impl Into<String>, backend: Arc<dyn QueryBackend>) {
        self.connections.write().insert(handle.into(), backend);
    }

    pub fn connection(&self, handle: &str) -> Option<Arc<dyn QueryBackend>> {
        self.connections.read().get(handle).cloned()
    }

    /// Stop listeners and timers, then close external connections
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.active.store(0, Ordering::SeqCst);

        let connections: Vec<_> = self.connections.write().drain().collect();
        for (handle, backend) in connections {
            debug!("Closing connection {}", handle);
            backend.close().await;
        }
    }
}

/// Expand `$NAME` references against `vars`
pub fn substitute_with(text: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = after
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
            .count();

        if len == 0 {
            out.push('$');
        } else if let Some(value) = vars.get(&after[..len]) {
            out.push_str(value);
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

/// A running bundle: its workspace and context
pub struct Runtime {
    context: Arc<RuntimeContext>,
    workspace: Workspace,
}

impl Runtime {
    /// Decode `bytes`, materialize the workspace and run the main file.
    ///
    /// A corrupt bundle fails before any directive executes. Returns once the
    /// main file has been parsed; listeners and schedules keep running.
    pub async fn start(bytes: &[u8], config: RuntimeConfig) -> RuntimeResult<Self> {
        let files = bundle::decode(bytes)?;
        Self::start_files(&files, config).await
    }

    /// Like [`Runtime::start`] for an already decoded file map
    pub async fn start_files(files: &FileMap, config: RuntimeConfig) -> RuntimeResult<Self> {
        let workspace = Workspace::materialize(files).await?;
        info!("Workspace ready at {:?} ({} files)", workspace.path(), files.len());

        let context = Arc::new(RuntimeContext::new(files, workspace.path(), config));
        let main = resolve_main_file(&context).await;

        if context.has_source(&main) {
            context.load_source(&main).await;
        } else {
            error!("Main file '{}' was not found in the archive.", main);
        }

        Ok(Self { context, workspace })
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Block until the run is over: a shutdown signal while listeners or
    /// schedules are active, else the idle grace delay.
    pub async fn wait(&self) {
        if self.context.keeps_alive() {
            info!("All tasks scheduled. Waiting for completion...");
            crate::server::shutdown_signal().await;
        } else {
            info!(
                "No long-running tasks found. The process will terminate in {:?}.",
                self.context.config.idle_grace
            );
            tokio::time::sleep(self.context.config.idle_grace).await;
        }
    }

    /// Release connections and remove the workspace
    pub async fn shutdown(self) -> RuntimeResult<()> {
        self.context.shutdown().await;
        self.workspace.close().await
    }
}

async fn resolve_main_file(context: &RuntimeContext) -> String {
    if let Some(main) = &context.config.main_file {
        return main.clone();
    }
    match ProjectManifest::load(&context.fs).await {
        Ok(Some(manifest)) => manifest.main,
        Ok(None) => {
            warn!("tontoo.json not found. Using {} as fallback.", DEFAULT_MAIN);
            DEFAULT_MAIN.to_string()
        }
        Err(e) => {
            warn!("{}. Using {} as fallback.", e, DEFAULT_MAIN);
            DEFAULT_MAIN.to_string()
        }
    }
}

/// Run a bundle to completion: start, wait, shut down
pub async fn run_bundle(bytes: &[u8], config: RuntimeConfig) -> RuntimeResult<()> {
    let runtime = Runtime::start(bytes, config).await?;
    runtime.wait().await;
    runtime
        .shutdown()
        .await
        .map_err(|e| e.with_context("cleanup"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let vars = vars(&[("PORT", "9090"), ("HOST_1", "example.org")]);
        assert_eq!(substitute_with("$HOST_1:$PORT", &vars), "example.org:9090");
        assert_eq!(substitute_with("[$MISSING]", &vars), "[]");
        assert_eq!(substitute_with("cost $5", &vars), "cost ");
        assert_eq!(substitute_with("a $ b $lower", &vars), "a $ b $lower");
        assert_eq!(substitute_with("end$", &vars), "end$");
    }

    #[test]
    fn test_substitute_is_not_recursive() {
        let vars = vars(&[("A", "$B"), ("B", "literal")]);
        assert_eq!(substitute_with("$A", &vars), "$B");
    }

    #[test]
    fn test_config_builders() {
        let config = RuntimeConfig::default()
            .with_main_file("App.tont")
            .with_idle_grace(Duration::from_millis(10));
        assert_eq!(config.main_file.as_deref(), Some("App.tont"));
        assert_eq!(config.packages_dir, PACKAGES_DIR);
        assert_eq!(config.idle_grace, Duration::from_millis(10));
    }

    #[test]
    fn test_context_tables() {
        let mut files = FileMap::new();
        files.insert("Main.tont".into(), String::new());
        files.insert("public/index.html".into(), String::new());
        let ctx = RuntimeContext::new(&files, Path::new("/tmp/none"), RuntimeConfig::default());

        assert!(ctx.has_source("Main.tont"));
        assert!(!ctx.has_source("public/index.html"));

        ctx.set_variable("NAME", "x");
        assert_eq!(ctx.substitute("hi $NAME"), "hi x");

        assert!(ctx.mark_loaded("Main.tont"));
        assert!(!ctx.mark_loaded("Main.tont"));
        assert!(!ctx.keeps_alive());
        assert!(ctx.server_status("webserver1").is_none());
    }
}
