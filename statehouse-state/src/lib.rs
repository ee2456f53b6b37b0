//! Statehouse State Store
//!
//! This crate implements a filesystem-backed remote state store with an
//! advisory per-state lock, following the protocol an infrastructure-as-code
//! client speaks to an HTTP state backend.
//!
//! # Overview
//!
//! - **StateBackend**: the store contract (get, update, purge, lock, unlock)
//! - **LocalBackend**: a backend keeping blobs and lock files in a directory
//! - **LockInfo**: the lock descriptor exchanged with clients
//! - **StateId**: a validated state identifier
//!
//! Locking is cooperative. The lock ID presented by a client is both the
//! lock's name and its only credential, so any client able to replay an ID
//! can release or re-confirm that lock.
//!
//! # Example
//!
//! ```ignore
//! use statehouse_state::{create_backend, BackendConfig, StateId};
//!
//! let config = BackendConfig::new("local").with_attribute("path", "/var/lib/statehouse");
//! let backend = create_backend(&config)?;
//! backend.init().await?;
//!
//! let id = StateId::new("prod")?;
//!
//! // Acquire lock before modifying state
//! let lock = backend.lock(&id, br#"{"ID": "a"}"#).await?;
//!
//! backend.update(&id, &new_state).await?;
//!
//! // Release lock
//! backend.unlock(&id, br#"{"ID": "a"}"#).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::StateId;
