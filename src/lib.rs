//! Tontoo
//!
//! Runtime and bundler for Tontoo projects: a small line-oriented directive
//! language describing variables, callable procedures, JSON web APIs and an
//! embedded web server.
//!
//! # Overview
//!
//! - **Bundle codec**: a project's files as one gzip-compressed, AES-256-CBC
//!   encrypted archive
//! - **Interpreter**: parses source files and runs directives in source order,
//!   buffering function bodies
//! - **Module resolver**: `load:` of installed packages and sibling files
//! - **Web server**: Axum listeners with session auth, JSON data-file APIs and
//!   static fallback, optionally over HTTPS
//! - **Host bridge**: sandboxed file primitives, commands and SQL connections
//!
//! # Architecture
//!
//! ```text
//! bundle bytes
//!      │ bundle::decode
//!      ▼
//! ┌─────────────┐
//! │  Workspace  │──► temp dir holding every file
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐      ┌──────────┐
//! │ Interpreter │─────►│ Resolver │──► load: packages / files
//! └──────┬──────┘      └──────────┘
//!        │ startWEB / webAPI
//!        ▼
//! ┌─────────────┐
//! │ Web Server  │──► auth endpoints, API dispatch, static files
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use tontoo::{RuntimeConfig, run_bundle};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bytes = std::fs::read("build/demo.tontoo").unwrap();
//!     run_bundle(&bytes, RuntimeConfig::default()).await.unwrap();
//! }
//! ```

pub mod bundle;
pub mod datafile;
pub mod error;
pub mod interpreter;
pub mod manifest;
pub mod parser;
pub mod project;
pub mod resolver;
pub mod routes;
pub mod runtime;
pub mod server;
pub mod session;
pub mod tls;
pub mod workspace;

// Re-exports for convenience
pub use bundle::{FileMap, decode, encode, encode_distributable};
pub use error::{HttpError, RuntimeError, RuntimeResult};
pub use manifest::ProjectManifest;
pub use parser::{Action, Directive, Parser};
pub use project::{BuildOutput, build_in_memory, build_project, check_syntax, collect_sources};
pub use routes::{ApiDecl, ApiPath, HttpMethod};
pub use runtime::{Runtime, RuntimeConfig, RuntimeContext, ServerStatus, run_bundle};
pub use server::ServerDecl;
pub use session::{SessionConfig, SessionData, SessionStore, UserStore, parse_cookies};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "Tontoo";

/// Print version information
pub fn print_version() {
    println!("{} v{}", NAME, VERSION);
}
