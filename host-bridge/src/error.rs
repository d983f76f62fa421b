//! Error types for host-bridge
//!
//! Provides error types used throughout the host-bridge crate.

use std::path::PathBuf;
use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Path escapes sandbox: {}", .0.display())]
    Sandbox(PathBuf),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
