//! Interpreter
//!
//! Drives a [`Parser`] over one source file and reduces its directives
//! against the [`RuntimeContext`]. Outside a function body every action runs
//! as soon as it is parsed, before the next line is read, so side effects
//! follow source order. Inside `:start: NAME … :end:` actions are buffered
//! and stored as the function's body.

use crate::error::{RuntimeError, RuntimeResult};
use crate::parser::{Action, BlockConfig, Directive, Parser};
use crate::routes::ApiDecl;
use crate::runtime::RuntimeContext;
use crate::server::{self, ServerDecl};
use futures::FutureExt;
use futures::future::BoxFuture;
use host_bridge::{DatabaseDriver, DbConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Nested function calls beyond this depth are refused
pub const MAX_CALL_DEPTH: usize = 64;

/// Reducer state while walking a file
enum Scope {
    TopLevel,
    InFunction { name: String, body: Vec<Action> },
}

impl RuntimeContext {
    /// Parse and run the source file `path` unless it was loaded before
    pub fn load_source<'a>(self: &'a Arc<Self>, path: &'a str) -> BoxFuture<'a, ()> {
        async move {
            if !self.mark_loaded(path) {
                debug!("{} already loaded", path);
                return;
            }
            let Some(text) = self.sources.get(path) else {
                error!("Source file {} is not in the bundle", path);
                return;
            };

            let mut parser = Parser::new(path, text);
            let mut scope = Scope::TopLevel;
            while let Some(next) = parser.next_directive() {
                match next {
                    Ok(directive) => self.reduce(&mut scope, directive).await,
                    Err(e) => error!("{}", e),
                }
            }

            if let Scope::InFunction { name, .. } = scope {
                warn!("{}: function '{}' is missing ':end:' and was discarded", path, name);
            }
        }
        .boxed()
    }

    async fn reduce(self: &Arc<Self>, scope: &mut Scope, directive: Directive) {
        match directive {
            Directive::SetVariable { key, value } => self.set_variable(key, value),
            Directive::BeginFunction(name) => {
                if let Scope::InFunction { name: open, .. } = scope {
                    warn!("':start: {}' inside unclosed function '{}', which is discarded", name, open);
                }
                *scope = Scope::InFunction {
                    name,
                    body: Vec::new(),
                };
            }
            Directive::EndFunction => match std::mem::replace(scope, Scope::TopLevel) {
                Scope::InFunction { name, body } => self.define_function(name, body),
                Scope::TopLevel => debug!("':end:' outside a function"),
            },
            Directive::Load(modules) => {
                for module in &modules {
                    self.resolve_module(module).await;
                }
            }
            Directive::Action(action) => match scope {
                Scope::InFunction { body, .. } => body.push(action),
                Scope::TopLevel => self.run_action(&action, 0).await,
            },
        }
    }

    /// Execute one action, logging any failure
    pub fn run_action<'a>(self: &'a Arc<Self>, action: &'a Action, depth: usize) -> BoxFuture<'a, ()> {
        async move {
            if let Err(e) = self.execute(action, depth).await {
                error!("{}", e);
            }
        }
        .boxed()
    }

    /// Invoke a defined function's buffered actions in order
    pub fn call_function<'a>(self: &'a Arc<Self>, name: &'a str, depth: usize) -> BoxFuture<'a, RuntimeResult<()>> {
        async move {
            let body = self.function(name).ok_or_else(|| {
                RuntimeError::directive(format!("Function \"{}\" was not found for direct execution.", name))
            })?;
            if depth >= MAX_CALL_DEPTH {
                return Err(RuntimeError::directive(format!(
                    "Function \"{}\" exceeded the call depth of {}",
                    name, MAX_CALL_DEPTH
                )));
            }
            for action in body.iter() {
                self.run_action(action, depth + 1).await;
            }
            Ok(())
        }
        .boxed()
    }

    async fn execute(self: &Arc<Self>, action: &Action, depth: usize) -> RuntimeResult<()> {
        match action {
            Action::Log(message) => {
                println!("{}", self.substitute(message));
            }
            Action::CopyFile { from, to } => {
                let (from, to) = (self.substitute(from), self.substitute(to));
                self.fs
                    .copy_file(&from, &to)
                    .await
                    .map_err(|e| RuntimeError::directive(format!("Could not copy \"{}\" to \"{}\": {}", from, to, e)))?;
            }
            Action::MoveFile { from, to } => {
                let (from, to) = (self.substitute(from), self.substitute(to));
                self.fs
                    .move_file(&from, &to)
                    .await
                    .map_err(|e| RuntimeError::directive(format!("Could not move \"{}\" to \"{}\": {}", from, to, e)))?;
            }
            Action::DeleteFile(path) => {
                let path = self.substitute(path);
                self.fs
                    .delete_file(&path)
                    .await
                    .map_err(|e| RuntimeError::directive(format!("Could not delete \"{}\": {}", path, e)))?;
            }
            Action::DeleteFolder(path) => {
                let path = self.substitute(path);
                self.fs
                    .delete_dir(&path)
                    .await
                    .map_err(|e| RuntimeError::directive(format!("Could not delete folder \"{}\": {}", path, e)))?;
            }
            Action::AddFolder(path) => {
                self.fs.create_dir(&self.substitute(path)).await?;
            }
            Action::AddFile(path) => {
                self.fs.create_file(&self.substitute(path)).await?;
            }
            Action::EditFile { file, content } => {
                let file = self.substitute(file);
                self.fs.write_file(&file, &self.substitute(content)).await?;
            }
            Action::Run { command, wait } => {
                let command = self.substitute(command);
                self.sys
                    .run(&command, *wait)
                    .await
                    .map_err(|e| RuntimeError::directive(format!("Command failed \"{}\": {}", command, e)))?;
            }
            Action::Call(name) => self.call_function(name, depth).await?,
            Action::Schedule { seconds, function } => self.schedule(*seconds, function.clone()),
            Action::Connect { id, config } => self.connect(id, config).await?,
            Action::Query { connection, config } => self.query(connection, config).await?,
            Action::DeclareApi { name, config } => {
                let decl = ApiDecl::from_block(name, config)?;
                debug!("Declared {} {} for {}", decl.method, decl.route, decl.server_id);
                self.apis.register(decl);
            }
            Action::StartWeb { path, config } => {
                let config = self.substitute_block(config);
                let decl = ServerDecl::from_block(&self.substitute(path), &config)?;
                server::start_web(self.clone(), decl).await;
            }
        }
        Ok(())
    }

    fn substitute_block(&self, config: &BlockConfig) -> BlockConfig {
        config
            .iter()
            .map(|(key, value)| (key.clone(), self.substitute(value)))
            .collect()
    }

    /// Call `function` every `seconds`. The name is looked up on each tick so
    /// it may be defined after the schedule.
    fn schedule(self: &Arc<Self>, seconds: u64, function: String) {
        info!("Scheduled '{}' every {}s", function, seconds);
        let ctx = self.clone();
        let period = Duration::from_secs(seconds);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if let Err(e) = ctx.call_function(&function, 0).await {
                    error!("schedule: {}", e);
                }
            }
        });
        self.keep_alive(task);
    }

    async fn connect(&self, id: &str, config: &BlockConfig) -> RuntimeResult<()> {
        let config = self.substitute_block(config);
        let db_config = match config.get("url") {
            Some(url) => DbConfig::new(url.as_str()),
            None => {
                let field = |key: &str| config.get(key).map(String::as_str).unwrap_or("");
                DbConfig::mysql(field("host"), field("user"), field("password"), field("database"))
                    .map_err(|e| RuntimeError::directive(format!("Connection \"{}\" failed: {}", id, e)))?
            }
        };

        let driver = DatabaseDriver::connect(&db_config)
            .await
            .map_err(|e| RuntimeError::directive(format!("Connection \"{}\" failed: {}", id, e)))?;
        let handle = connection_handle(id);
        info!("Connection '{}' ready as {}", id, handle);
        self.add_connection(handle, Arc::new(driver));
        Ok(())
    }

    async fn query(&self, connection: &str, config: &BlockConfig) -> RuntimeResult<()> {
        let handle = connection_handle(connection);
        let backend = self
            .connection(&handle)
            .ok_or_else(|| RuntimeError::directive(format!("No connection named \"{}\"", connection)))?;

        let sql = self.substitute(config.get("sql").map(String::as_str).unwrap_or(""));
        let rows = backend
            .query(&sql)
            .await
            .map_err(|e| RuntimeError::directive(format!("Query on \"{}\" failed: {}", connection, e)))?;

        match config.get("into").filter(|name| !name.is_empty()) {
            Some(into) => {
                let json = serde_json::to_string(&rows)
                    .map_err(|e| RuntimeError::directive(e.to_string()))?;
                self.set_variable(into.clone(), json);
            }
            None => debug!("Query on {} returned {} rows", connection, rows.len()),
        }
        Ok(())
    }
}

/// Name the query handle of connection `id` is registered under
pub fn connection_handle(id: &str) -> String {
    format!("{}_query", id)
}
