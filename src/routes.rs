//! Web API Declarations
//!
//! `webAPI` blocks become [`ApiDecl`]s grouped by the server id they target.
//! Incoming API paths are matched literally or with their last segment
//! replaced by the `$ID` placeholder.

use crate::error::{RuntimeError, RuntimeResult};
use crate::parser::BlockConfig;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Placeholder segment in a route pattern
pub const ID_PLACEHOLDER: &str = "$ID";

/// HTTP methods an API declaration may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    /// Parse HTTP method from string
    pub fn from_str(s: &str) -> RuntimeResult<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::GET),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "PATCH" => Ok(HttpMethod::PATCH),
            "DELETE" => Ok(HttpMethod::DELETE),
            "HEAD" => Ok(HttpMethod::HEAD),
            "OPTIONS" => Ok(HttpMethod::OPTIONS),
            other => Err(RuntimeError::config(format!(
                "Unknown HTTP method: {}",
                other
            ))),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One `webAPI` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ApiDecl {
    pub name: String,
    pub method: HttpMethod,
    /// Backing JSON file, workspace relative. Variables are substituted per request.
    pub data: String,
    /// Route pattern with any trailing `/` removed
    pub route: String,
    pub auth_required: bool,
    pub server_id: String,
}

impl ApiDecl {
    /// Build a declaration from a `webAPI` block
    pub fn from_block(name: &str, config: &BlockConfig) -> RuntimeResult<Self> {
        let server_id = config
            .get("webserverid")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RuntimeError::config(format!("webAPI \"{}\" has no 'webserverid'", name)))?;
        let route = config
            .get("line")
            .ok_or_else(|| RuntimeError::config(format!("webAPI \"{}\" has no 'line'", name)))?;
        let method = HttpMethod::from_str(config.get("type").map(String::as_str).unwrap_or("get"))?;

        Ok(Self {
            name: name.to_string(),
            method,
            data: config.get("data").cloned().unwrap_or_default(),
            route: route.trim_end_matches('/').to_string(),
            auth_required: config.get("user").is_some_and(|u| u == "true"),
            server_id: server_id.clone(),
        })
    }
}

/// A request path with the API prefix removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPath {
    /// e.g. `/news/42`
    pub path: String,
    /// e.g. `/news/$ID`
    pub dynamic: String,
    /// e.g. `42`
    pub last_segment: String,
}

impl ApiPath {
    /// Split `pathname` under `prefix`; `None` if it is not an API request
    pub fn parse(pathname: &str, prefix: &str) -> Option<Self> {
        let rest = pathname.strip_prefix(prefix)?;
        let rest = rest.trim_start_matches('/').trim_end_matches('/');
        let path = format!("/{}", rest);

        let (parent, last) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
        Some(Self {
            dynamic: format!("{}/{}", parent, ID_PLACEHOLDER),
            last_segment: last.to_string(),
            path: path.clone(),
        })
    }

    /// The numeric id in the last segment, if it is all digits
    pub fn record_id(&self) -> Option<&str> {
        let last = self.last_segment.as_str();
        (!last.is_empty() && last.bytes().all(|b| b.is_ascii_digit())).then_some(last)
    }
}

/// Find the declaration serving `method` on `path`
pub fn match_api<'a>(decls: &'a [ApiDecl], method: HttpMethod, path: &ApiPath) -> Option<&'a ApiDecl> {
    decls
        .iter()
        .find(|api| api.method == method && (api.route == path.path || api.route == path.dynamic))
}

/// Declared APIs grouped by target server id
#[derive(Default)]
pub struct ApiRegistry {
    by_server: RwLock<HashMap<String, Vec<ApiDecl>>>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, decl: ApiDecl) {
        self.by_server
            .write()
            .entry(decl.server_id.clone())
            .or_default()
            .push(decl);
    }

    /// Snapshot of the declarations bound to `server_id`, in declaration order
    pub fn for_server(&self, server_id: &str) -> Vec<ApiDecl> {
        self.by_server
            .read()
            .get(server_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The declaration bound to `server_id` matching `method` and `path`, as
    /// registered at the time of the call
    pub fn find(&self, server_id: &str, method: HttpMethod, path: &ApiPath) -> Option<ApiDecl> {
        let by_server = self.by_server.read();
        let decls = by_server.get(server_id)?;
        match_api(decls, method, path).cloned()
    }

    /// Get declaration count
    pub fn len(&self) -> usize {
        self.by_server.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(method: HttpMethod, route: &str) -> ApiDecl {
        ApiDecl {
            name: route.to_string(),
            method,
            data: "news.json".to_string(),
            route: route.trim_end_matches('/').to_string(),
            auth_required: false,
            server_id: "webserver1".to_string(),
        }
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpMethod::from_str("GET").unwrap(), HttpMethod::GET);
        assert_eq!(HttpMethod::from_str("post").unwrap(), HttpMethod::POST);
        assert_eq!(HttpMethod::from_str("Delete").unwrap(), HttpMethod::DELETE);
        assert!(HttpMethod::from_str("INVALID").is_err());
    }

    #[test]
    fn test_api_path_split() {
        let path = ApiPath::parse("/api/news/42", "/api/").unwrap();
        assert_eq!(path.path, "/news/42");
        assert_eq!(path.dynamic, "/news/$ID");
        assert_eq!(path.record_id(), Some("42"));

        let path = ApiPath::parse("/api/news/", "/api/").unwrap();
        assert_eq!(path.path, "/news");
        assert_eq!(path.dynamic, "/$ID");
        assert_eq!(path.record_id(), None);

        assert!(ApiPath::parse("/index.html", "/api/").is_none());
    }

    #[test]
    fn test_prefix_without_trailing_slash() {
        let path = ApiPath::parse("/v1/ping", "/v1").unwrap();
        assert_eq!(path.path, "/ping");
    }

    #[test]
    fn test_dynamic_route_matching() {
        let decls = vec![decl(HttpMethod::GET, "/news/"), decl(HttpMethod::GET, "/news/$ID")];

        let single = ApiPath::parse("/api/news/42", "/api/").unwrap();
        assert_eq!(match_api(&decls, HttpMethod::GET, &single).unwrap().route, "/news/$ID");

        let list = ApiPath::parse("/api/news/", "/api/").unwrap();
        assert_eq!(match_api(&decls, HttpMethod::GET, &list).unwrap().route, "/news");

        assert!(match_api(&decls, HttpMethod::POST, &list).is_none());
    }

    #[test]
    fn test_dynamic_route_alone_does_not_match_collection() {
        let decls = vec![decl(HttpMethod::GET, "/news/$ID")];
        let list = ApiPath::parse("/api/news/", "/api/").unwrap();
        assert!(match_api(&decls, HttpMethod::GET, &list).is_none());
    }

    #[test]
    fn test_from_block() {
        let config: BlockConfig = [
            ("type", "post"),
            ("data", "news.json"),
            ("user", "true"),
            ("webserverid", "webserver1"),
            ("line", "/news/"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let api = ApiDecl::from_block("postNews", &config).unwrap();
        assert_eq!(api.method, HttpMethod::POST);
        assert_eq!(api.route, "/news");
        assert!(api.auth_required);

        let mut missing = config.clone();
        missing.remove("webserverid");
        assert!(ApiDecl::from_block("postNews", &missing).is_err());
    }

    #[test]
    fn test_registry_groups_by_server() {
        let registry = ApiRegistry::new();
        registry.register(decl(HttpMethod::GET, "/a"));
        let mut other = decl(HttpMethod::GET, "/b");
        other.server_id = "admin".to_string();
        registry.register(other);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.for_server("webserver1").len(), 1);
        assert_eq!(registry.for_server("admin")[0].route, "/b");
        assert!(registry.for_server("missing").is_empty());
    }
}
