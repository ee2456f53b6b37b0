//! State backend trait and error types

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::state::StateId;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// No state blob exists for the identifier
    #[error("State not found: {0}")]
    NotFound(String),

    /// A lock descriptor could not be decoded
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The lock is held under a different ID than the one presented
    #[error(
        "State is locked by {} (lock ID: {}, operation: {}), requested lock ID: {}",
        .current.who,
        .current.id,
        .current.operation,
        .requested_id
    )]
    Conflict {
        current: Box<LockInfo>,
        requested_id: String,
    },

    /// The identifier cannot be used to name state files
    #[error("Invalid state identifier: {0}")]
    InvalidId(String),

    /// Filesystem read/write/delete failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Create a Conflict error from the lock currently on disk
    pub fn conflict(current: &LockInfo, requested_id: impl Into<String>) -> Self {
        Self::Conflict {
            current: Box::new(current.clone()),
            requested_id: requested_id.into(),
        }
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this is an expected contention outcome rather than a failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// HTTP-equivalent status a request layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Conflict { .. } => 409,
            Self::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// The lock currently on disk, for Conflict errors
    pub fn current_lock(&self) -> Option<&LockInfo> {
        match self {
            Self::Conflict { current, .. } => Some(current),
            _ => None,
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for state storage backends
///
/// Every operation is keyed by a [`StateId`]. Locking is advisory: the store
/// compares lock IDs but never prevents a blob write from a caller that did
/// not take the lock.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the stored state blob
    ///
    /// Fails with `NotFound` if nothing has been stored under `id`
    async fn get(&self, id: &StateId) -> BackendResult<Vec<u8>>;

    /// Replace the stored state blob
    async fn update(&self, id: &StateId, state: &[u8]) -> BackendResult<()>;

    /// Delete the stored state blob
    ///
    /// Succeeds if the blob does not exist
    async fn purge(&self, id: &StateId) -> BackendResult<()>;

    /// Acquire or re-confirm the lock using an encoded descriptor
    ///
    /// Returns the descriptor on disk. Presenting the ID of the current
    /// holder succeeds without modifying the lock; any other ID conflicts.
    async fn lock(&self, id: &StateId, descriptor: &[u8]) -> BackendResult<LockInfo>;

    /// Release the lock using an encoded descriptor
    ///
    /// Succeeds if no lock is held; conflicts if held under another ID
    async fn unlock(&self, id: &StateId, descriptor: &[u8]) -> BackendResult<()>;

    /// Read the current lock holder, if any
    async fn read_lock(&self, id: &StateId) -> BackendResult<Option<LockInfo>>;

    /// Release the lock by its bare lock ID
    ///
    /// This is an administrative operation that should be used with caution
    async fn force_unlock(&self, id: &StateId, lock_id: &str) -> BackendResult<()>;

    /// List identifiers that currently have a stored blob
    async fn list_states(&self) -> BackendResult<Vec<StateId>>;

    /// Initialize the backend (create the storage directory if needed, etc.)
    async fn init(&self) -> BackendResult<()>;
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (currently only "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, String>,
}

impl BackendConfig {
    /// Create a config for the given backend type with no attributes
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    /// Set an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Get a boolean attribute value
    ///
    /// Fails if the attribute is present but not "true" or "false"
    pub fn get_bool(&self, key: &str) -> BackendResult<Option<bool>> {
        match self.get_string(key) {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(BackendError::configuration(format!(
                "Attribute '{}' must be true or false, got '{}'",
                key, other
            ))),
        }
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> BackendResult<bool> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }
}
