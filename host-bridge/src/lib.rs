//! Host capabilities for the Tontoo runtime.
//!
//! The interpreter never touches the operating system directly. File
//! primitives go through [`FsBridge`] (sandboxed to the run's workspace),
//! `run:` commands through [`SysBridge`], hashing and identifiers through
//! [`CryptoBridge`], and external data connections through the
//! [`QueryBackend`] trait implemented by [`DatabaseDriver`].

mod crypto;
mod db;
mod fs;
mod sys;
pub mod error;

pub use crypto::CryptoBridge;
pub use db::{DatabaseDriver, DbConfig, DbRow, QueryBackend};
pub use error::{BridgeError, BridgeResult};
pub use fs::FsBridge;
pub use sys::SysBridge;
