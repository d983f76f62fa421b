//! Web Server Engine
//!
//! `startWEB` binds an Axum listener whose single fallback handler runs the
//! request algorithm:
//!
//! 1. `POST /login` and `POST /register` when the server enables users
//! 2. API dispatch for paths under the API prefix
//! 3. Static files from the public root, with the not-found page on a miss
//!
//! With `ssl` enabled the same router is also served over HTTPS on the TLS
//! port (see [`crate::tls`]).

use crate::datafile::parse_record;
use crate::error::{HttpError, RuntimeError, RuntimeResult};
use crate::parser::BlockConfig;
use crate::routes::{ApiPath, HttpMethod};
use crate::runtime::{RuntimeContext, ServerStatus};
use crate::session::{Registration, SessionData, SessionStore, UserStore};
use crate::tls;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Server configuration from a `startWEB` block
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDecl {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Public asset root, workspace relative
    pub public_dir: String,
    pub landing: String,
    pub not_found: String,
    pub api_prefix: String,
    /// Enables `/login`, `/register` and the user store
    pub users: bool,
    pub ssl: bool,
    pub ssl_port: u16,
    pub ssl_bits: u32,
}

impl Default for ServerDecl {
    fn default() -> Self {
        Self {
            id: "webserver1".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            public_dir: "public".to_string(),
            landing: "index.html".to_string(),
            not_found: "404.html".to_string(),
            api_prefix: "/api/".to_string(),
            users: false,
            ssl: false,
            ssl_port: 443,
            ssl_bits: 2048,
        }
    }
}

impl ServerDecl {
    /// Build from an already substituted block. `path` is the argument given
    /// after `startWEB:`, used as public root when the block has no `path`.
    pub fn from_block(path: &str, config: &BlockConfig) -> RuntimeResult<Self> {
        let defaults = Self::default();
        let text = |key: &str, default: String| -> String {
            config
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or(default)
        };
        let number = |key: &str, default: u16| -> RuntimeResult<u16> {
            match config.get(key).filter(|v| !v.is_empty()) {
                Some(v) => v
                    .parse()
                    .map_err(|_| RuntimeError::config(format!("invalid {} '{}'", key, v))),
                None => Ok(default),
            }
        };

        let public_dir = match config.get("path").filter(|v| !v.is_empty()) {
            Some(dir) => dir.clone(),
            None if !path.is_empty() => path.to_string(),
            None => defaults.public_dir.clone(),
        };
        let ssl_bits = match config.get("sslbits").filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse()
                .map_err(|_| RuntimeError::config(format!("invalid sslbits '{}'", v)))?,
            None => defaults.ssl_bits,
        };

        Ok(Self {
            id: text("id", defaults.id),
            host: text("host", defaults.host),
            port: number("port", defaults.port)?,
            public_dir,
            landing: text("landing", defaults.landing),
            not_found: text("404", defaults.not_found),
            api_prefix: text("api", defaults.api_prefix),
            users: config.get("user").is_some_and(|v| v == "true"),
            ssl: config.get("ssl").is_some_and(|v| v == "true"),
            ssl_port: number("sslport", defaults.ssl_port)?,
            ssl_bits,
        })
    }
}

/// Application state shared across requests of one server
#[derive(Clone)]
pub struct AppState {
    ctx: Arc<RuntimeContext>,
    decl: Arc<ServerDecl>,
    sessions: Arc<RwLock<SessionStore>>,
    users: Arc<Mutex<UserStore>>,
}

impl AppState {
    pub fn new(ctx: Arc<RuntimeContext>, decl: ServerDecl, users: UserStore) -> Self {
        Self {
            ctx,
            decl: Arc::new(decl),
            sessions: Arc::new(RwLock::new(SessionStore::default())),
            users: Arc::new(Mutex::new(users)),
        }
    }
}

/// Start the listeners of one `startWEB` declaration. Failures are logged
/// and leave the server marked failed; they never abort the run.
pub async fn start_web(ctx: Arc<RuntimeContext>, decl: ServerDecl) {
    let users = if decl.users {
        load_users(&ctx, &decl.id).await
    } else {
        UserStore::new()
    };

    let state = AppState::new(ctx.clone(), decl.clone(), users);
    let apis = ctx.apis.for_server(&decl.id);
    info!("Server '{}' has {} API routes", decl.id, apis.len());
    for api in &apis {
        debug!("  {} {} -> {}", api.method, api.route, api.data);
    }
    let app = build_router(state);

    let listener = match TcpListener::bind((decl.host.as_str(), decl.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let err = RuntimeError::listener(format!("{}:{}: {}", decl.host, decl.port, e));
            error!("HTTP server '{}' error: {}", decl.id, err);
            ctx.set_server_status(&decl.id, ServerStatus::Failed);
            return;
        }
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("HTTP server '{}' error: {}", decl.id, e);
            ctx.set_server_status(&decl.id, ServerStatus::Failed);
            return;
        }
    };

    info!("Server '{}' listening on http://{}", decl.id, addr);
    ctx.set_server_status(&decl.id, ServerStatus::Listening(addr));

    let http_app = app.clone();
    let id = decl.id.clone();
    ctx.keep_alive(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, http_app).await {
            error!("HTTP server '{}' error: {}", id, e);
        }
    }));

    if decl.ssl {
        start_https(&ctx, &decl, app).await;
    }
}

async fn load_users(ctx: &RuntimeContext, id: &str) -> UserStore {
    match UserStore::load(&ctx.fs).await {
        Ok(Some(users)) => users,
        Ok(None) => {
            error!(
                "Error for web server '{}': User authentication enabled but users.json not found.",
                id
            );
            UserStore::new()
        }
        Err(e) => {
            error!("Error for web server '{}': {}", id, e);
            UserStore::new()
        }
    }
}

async fn start_https(ctx: &Arc<RuntimeContext>, decl: &ServerDecl, app: Router) {
    let result = async {
        let ssl_dir = ctx.fs.resolve("ssl")?;
        let (cert, key) = tls::ensure_certificate(&ssl_dir, decl.ssl_bits).await?;
        let config = tls::load_server_config(&cert, &key)?;
        let listener = TcpListener::bind((decl.host.as_str(), decl.ssl_port))
            .await
            .map_err(|e| RuntimeError::listener(format!("{}:{}: {}", decl.host, decl.ssl_port, e)))?;
        Ok::<_, RuntimeError>((config, listener))
    }
    .await;

    match result {
        Ok((config, listener)) => {
            info!("Server '{}' listening on https://{}:{}", decl.id, decl.host, decl.ssl_port);
            ctx.keep_alive(tokio::spawn(tls::serve(listener, config, app)));
        }
        Err(e) => warn!(
            "Could not start HTTPS server '{}': {}. Are ssl/server.key and server.crt set up?",
            decl.id, e
        ),
    }
}

/// Build the Axum router with middleware
fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Handle all incoming requests
async fn handle_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    debug!("Incoming request: {} {}", method, uri.path());
    dispatch(&state, &method, uri.path(), &headers, &body).await
}

/// Run the request algorithm for one request with its full body read
pub async fn dispatch(
    state: &AppState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    if state.decl.users && method == Method::POST {
        match path {
            "/login" => return login(state, body).await,
            "/register" => return register(state, body).await,
            _ => {}
        }
    }

    if let Some(api_path) = ApiPath::parse(path, &state.decl.api_prefix) {
        return match handle_api(state, method, &api_path, headers, body).await {
            Ok(response) => response,
            Err(err) => json_error(err),
        };
    }

    serve_static(state, path).await
}

// =========================================
// AUTH ENDPOINTS
// =========================================

fn credentials(body: &[u8]) -> (Option<String>, Option<String>) {
    let form: HashMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
    let field = |key: &str| form.get(key).filter(|v| !v.is_empty()).cloned();
    (field("username"), field("password"))
}

async fn login(state: &AppState, body: &[u8]) -> Response {
    let (username, password) = credentials(body);
    let user_id = match (&username, &password) {
        (Some(username), Some(password)) => state.users.lock().await.verify(username, password),
        _ => None,
    };

    match (user_id, username) {
        (Some(user_id), Some(username)) => {
            let mut sessions = state.sessions.write();
            let token = sessions.create(SessionData { user_id, username });
            let cookie = sessions.format_cookie(&token);
            redirect("/", Some(cookie))
        }
        _ => html(
            StatusCode::UNAUTHORIZED,
            "<h1>401 Unauthorized</h1><p>Incorrect username or password. <a href=\"/login.html\">Try again</a>.</p>",
        ),
    }
}

async fn register(state: &AppState, body: &[u8]) -> Response {
    let (username, password) = credentials(body);
    let mut users = state.users.lock().await;

    if username.as_deref().is_some_and(|name| users.contains(name)) {
        return html(
            StatusCode::CONFLICT,
            "<h1>409 Conflict</h1><p>Username already exists. <a href=\"/register.html\">Choose another</a>.</p>",
        );
    }
    let (Some(username), Some(password)) = (username, password) else {
        return html(
            StatusCode::BAD_REQUEST,
            "<h1>400 Bad Request</h1><p>Invalid username or password.</p>",
        );
    };

    if users.register(&username, &password) == Registration::Exists {
        return html(StatusCode::CONFLICT, "<h1>409 Conflict</h1>");
    }
    if let Err(e) = users.save(&state.ctx.fs).await {
        error!("Could not persist users: {}", e);
        return json_error(HttpError::from(e));
    }
    info!("Registered user {}", username);
    redirect("/login.html", None)
}

// =========================================
// API DISPATCH
// =========================================

async fn handle_api(
    state: &AppState,
    method: &Method,
    api_path: &ApiPath,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, HttpError> {
    let api = HttpMethod::from_str(method.as_str())
        .ok()
        .and_then(|m| state.ctx.apis.find(&state.decl.id, m, api_path))
        .ok_or_else(|| HttpError::not_found("API endpoint not found."))?;

    let author = if api.auth_required {
        let session = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|cookie| state.sessions.read().from_cookie_header(cookie))
            .ok_or_else(HttpError::forbidden)?;
        Some(session.user_id)
    } else {
        None
    };

    let data_path = state.ctx.substitute(&api.data);
    let store = &state.ctx.data;

    match api.method {
        HttpMethod::GET => match api_path.record_id() {
            Some(id) => {
                let record = store
                    .find(&data_path, id)
                    .await?
                    .ok_or_else(|| HttpError::not_found("Not found"))?;
                Ok(json(StatusCode::OK, &record))
            }
            None => {
                let records = store.read_all(&data_path).await?;
                Ok(json(StatusCode::OK, &Value::Array(records)))
            }
        },
        HttpMethod::POST => {
            let record = parse_record(body)?;
            let stored = store.append(&data_path, record, author.as_deref()).await?;
            Ok(json(StatusCode::CREATED, &stored))
        }
        other => Err(HttpError::method_not_allowed(format!(
            "Method {} is not supported for API routes",
            other
        ))),
    }
}

// =========================================
// STATIC FILES
// =========================================

async fn serve_static(state: &AppState, path: &str) -> Response {
    let decl = &state.decl;
    let fs = &state.ctx.fs;
    let requested = if path == "/" {
        decl.landing.as_str()
    } else {
        path.trim_start_matches('/')
    };

    let hit = format!("{}/{}", decl.public_dir, requested);
    let escapes = requested.split('/').any(|segment| segment == "..");
    let (file, status) = if !escapes && fs.is_file(&hit).await {
        (hit, StatusCode::OK)
    } else {
        (format!("{}/{}", decl.public_dir, decl.not_found), StatusCode::NOT_FOUND)
    };

    match fs.read(&file).await {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, mime_type(&file))], bytes).into_response(),
        Err(e) => {
            debug!("Not-found page {} unreadable: {}", file, e);
            (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain")], "Not Found").into_response()
        }
    }
}

/// Content type for a file path by extension
pub fn mime_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .filter(|(_, ext)| !ext.contains('/'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

// =========================================
// RESPONSES
// =========================================

fn json(status: StatusCode, value: &Value) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], value.to_string()).into_response()
}

fn json_error(err: HttpError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json(status, &err.to_json())
}

fn html(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/html")], body).into_response()
}

fn redirect(location: &str, cookie: Option<String>) -> Response {
    let mut response = (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received termination signal, shutting down...");
        }
    }
}
