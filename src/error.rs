//! Error types for the Tontoo runtime
//!
//! Build, load, directive, request and listener failures each have their
//! own variant so callers can decide what is fatal.

use thiserror::Error;

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Unbalanced blocks or a dangling keyword found by the pre-build check
    #[error("Syntax Error in {file} on line {line}: {message}")]
    BuildSyntax {
        file: String,
        line: usize,
        message: String,
    },

    /// Bundle could not be decompressed, decrypted or parsed
    #[error("Corrupt bundle: {0}")]
    CorruptBundle(String),

    /// Malformed source the runtime parser cannot recover from
    #[error("Parse error in {file} on line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// A directive failed while executing; logged, never fatal
    #[error("Directive error: {0}")]
    Directive(String),

    /// A listener could not be started
    #[error("Listener error: {0}")]
    Listener(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host capability failure
    #[error(transparent)]
    Bridge(#[from] host_bridge::BridgeError),

    /// Generic error with context
    #[error("{context}: {message}")]
    WithContext { context: String, message: String },
}

impl RuntimeError {
    pub fn build_syntax(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::BuildSyntax {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn parse(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn corrupt_bundle(message: impl Into<String>) -> Self {
        Self::CorruptBundle(message.into())
    }

    pub fn directive(message: impl Into<String>) -> Self {
        Self::Directive(message.into())
    }

    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            message: self.to_string(),
        }
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Error answered to an HTTP client by the web API layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(405, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(500, format!("Server error: {}", message.into()))
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.message })
    }
}

impl From<RuntimeError> for HttpError {
    fn from(err: RuntimeError) -> Self {
        HttpError::internal_error(err.to_string())
    }
}
