//! Session and User Storage
//!
//! Provides the state behind a server's login/register endpoints:
//! - In-memory sessions keyed by an opaque cookie token
//! - The `users.json` user store (username → password hash + user id)
//! - Cookie formatting and parsing
//!
//! Sessions live only in process memory. There is no server-side expiry;
//! the cookie's own `Max-Age` bounds a session from the client side.

use crate::error::{RuntimeError, RuntimeResult};
use host_bridge::{CryptoBridge, FsBridge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// File the user store is persisted to, workspace relative
pub const USERS_FILE: &str = "users.json";

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    /// User identifier stamped on records as `author`
    pub user_id: String,
    pub username: String,
}

/// Session cookie configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie lifetime in seconds (default: 86400 = 1 day)
    pub max_age_seconds: u64,
    /// Cookie name for the session token
    pub cookie_name: String,
    pub cookie_path: String,
    pub http_only: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: 86400,
            cookie_name: "sessionId".to_string(),
            cookie_path: "/".to_string(),
            http_only: true,
        }
    }
}

/// In-memory session store
pub struct SessionStore {
    sessions: HashMap<String, SessionData>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Mint a token for `data` and return it
    pub fn create(&mut self, data: SessionData) -> String {
        let token = CryptoBridge::random_id();
        info!("Creating session for user {}", data.username);
        self.sessions.insert(token.clone(), data);
        token
    }

    /// Get a session by token
    pub fn get(&self, token: &str) -> Option<SessionData> {
        self.sessions.get(token).cloned()
    }

    /// Look up the session named by a request's `Cookie` header
    pub fn from_cookie_header(&self, header: &str) -> Option<SessionData> {
        let cookies = parse_cookies(header);
        let token = cookies.get(&self.config.cookie_name)?;
        self.get(token)
    }

    /// Get session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Format a Set-Cookie header for the session
    pub fn format_cookie(&self, token: &str) -> String {
        let mut cookie = format!("{}={}", self.config.cookie_name, token);
        if self.config.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str(&format!("; Path={}", self.config.cookie_path));
        cookie.push_str(&format!("; Max-Age={}", self.config.max_age_seconds));
        cookie
    }

    /// Get count of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Parse cookies from a Cookie header value
/// Returns a HashMap of cookie name -> value
pub fn parse_cookies(cookie_header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((name, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            cookies.insert(name.trim().to_string(), value.to_string());
        }
    }

    cookies
}

/// One stored account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Hex SHA-256 of the password
    pub password_hash: String,
    pub uuid: String,
}

/// Outcome of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Created,
    Exists,
}

/// Username → account map backed by `users.json`
#[derive(Debug, Default)]
pub struct UserStore {
    users: BTreeMap<String, UserRecord>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the user store from the workspace. Returns `None` when the file
    /// does not exist.
    pub async fn load(fs: &FsBridge) -> RuntimeResult<Option<Self>> {
        if !fs.is_file(USERS_FILE).await {
            return Ok(None);
        }
        let text = fs.read_to_string(USERS_FILE).await?;
        let users = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::config(format!("{} is not valid: {}", USERS_FILE, e)))?;
        Ok(Some(Self { users }))
    }

    /// Persist the store as pretty JSON
    pub async fn save(&self, fs: &FsBridge) -> RuntimeResult<()> {
        let text = serde_json::to_string_pretty(&self.users)
            .map_err(|e| RuntimeError::config(e.to_string()))?;
        fs.write_file(USERS_FILE, &text).await?;
        Ok(())
    }

    /// Check credentials; on success returns the user's id
    pub fn verify(&self, username: &str, password: &str) -> Option<String> {
        let user = self.users.get(username)?;
        (user.password_hash == CryptoBridge::sha256_hex(password)).then(|| user.uuid.clone())
    }

    /// Add a user with a fresh id unless the name is taken
    pub fn register(&mut self, username: &str, password: &str) -> Registration {
        if self.users.contains_key(username) {
            debug!("Registration rejected, {} exists", username);
            return Registration::Exists;
        }
        self.users.insert(
            username.to_string(),
            UserRecord {
                password_hash: CryptoBridge::sha256_hex(password),
                uuid: CryptoBridge::random_id(),
            },
        );
        Registration::Created
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn alice() -> SessionData {
        SessionData {
            user_id: "u-1".to_string(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn test_session_create_and_get() {
        let mut store = SessionStore::default();
        let token = store.create(alice());

        assert!(!token.is_empty());
        assert_eq!(store.get(&token), Some(alice()));
        assert!(store.get("unknown").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_session_from_cookie_header() {
        let mut store = SessionStore::default();
        let token = store.create(alice());

        let header = format!("theme=dark; sessionId={}", token);
        assert_eq!(store.from_cookie_header(&header).unwrap().username, "alice");
        assert!(store.from_cookie_header("sessionId=forged").is_none());
        assert!(store.from_cookie_header("").is_none());
    }

    #[test]
    fn test_parse_cookies() {
        let cookies = parse_cookies("sessionId=abc123; theme=dark;lang=\"en\"");

        assert_eq!(cookies.get("sessionId"), Some(&"abc123".to_string()));
        assert_eq!(cookies.get("theme"), Some(&"dark".to_string()));
        assert_eq!(cookies.get("lang"), Some(&"en".to_string()));
    }

    #[test]
    fn test_format_cookie() {
        let store = SessionStore::default();
        assert_eq!(
            store.format_cookie("tok"),
            "sessionId=tok; HttpOnly; Path=/; Max-Age=86400"
        );
    }

    #[test]
    fn test_register_and_verify() {
        let mut users = UserStore::new();
        assert_eq!(users.register("alice", "secret"), Registration::Created);
        assert_eq!(users.register("alice", "other"), Registration::Exists);

        let id = users.verify("alice", "secret").unwrap();
        assert!(!id.is_empty());
        assert!(users.verify("alice", "wrong").is_none());
        assert!(users.verify("bob", "secret").is_none());
    }

    #[tokio::test]
    async fn test_user_store_persistence() {
        let dir = TempDir::new().unwrap();
        let fs = FsBridge::with_sandbox(dir.path());
        assert!(UserStore::load(&fs).await.unwrap().is_none());

        let mut users = UserStore::new();
        users.register("alice", "secret");
        users.save(&fs).await.unwrap();

        let text = fs.read_to_string(USERS_FILE).await.unwrap();
        assert!(text.contains("passwordHash"));

        let loaded = UserStore::load(&fs).await.unwrap().unwrap();
        assert!(loaded.verify("alice", "secret").is_some());
    }
}
