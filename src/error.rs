//! Error types for Haven Core.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Haven operations
pub type HavenResult<T> = Result<T, HavenError>;

/// The remote operation that failed, carried inside [`HavenError::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    List,
    Create,
    Update,
    Delete,
    GetEnvelope,
    PutEnvelope,
}

impl RemoteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOperation::List => "list",
            RemoteOperation::Create => "create",
            RemoteOperation::Update => "update",
            RemoteOperation::Delete => "delete",
            RemoteOperation::GetEnvelope => "get_envelope",
            RemoteOperation::PutEnvelope => "put_envelope",
        }
    }
}

impl std::fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for Haven operations
#[derive(Error, Debug)]
pub enum HavenError {
    /// Wrong passphrase or a corrupted/tampered envelope. The two cases are
    /// indistinguishable on purpose: the AEAD tag failure is the only signal,
    /// and telling them apart would hand an attacker an oracle. Callers must
    /// present both identically ("invalid master password").
    #[error("vault unlock failed")]
    VaultUnlockFailed,

    /// The AEAD refused to encrypt. Practically unreachable with in-memory
    /// buffers but kept distinct from unlock failures.
    #[error("vault encryption failed")]
    VaultSealFailed,

    #[error("remote {operation} failed: {message}")]
    Remote {
        operation: RemoteOperation,
        id: Option<String>,
        message: String,
    },

    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
}

impl HavenError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        HavenError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new remote-operation error
    pub fn remote(
        operation: RemoteOperation,
        id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        HavenError::Remote {
            operation,
            id: id.map(String::from),
            message: message.into(),
        }
    }

    /// True when this error is a remote-store failure for the given operation
    pub fn is_remote(&self, operation: RemoteOperation) -> bool {
        matches!(self, HavenError::Remote { operation: op, .. } if *op == operation)
    }
}
