//! Authoritative state management.
//!
//! - [`StateManager`]: owns the in-memory snapshot, persists through a
//!   [`StateStore`] and broadcasts every successful replacement
//! - [`FileStore`]: single-node JSON file backend with no-op locks
//! - [`ClusterStore`]: multi-controller backend with leased locks and
//!   change callbacks

mod cluster;
mod file;
mod manager;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use sitefleet_common::{CertificateId, StateValidationError};

pub use cluster::{ClusterBackend, ClusterStore, LEADER_LOCK};
pub use file::FileStore;
pub(crate) use manager::is_valid_dh_pem;
pub use manager::{StateManager, DEFAULT_DH_PARAMS_PEM, STATE_LOCK};
pub use store::{LockLease, StateStore, StateUpdateCallback};

/// State management errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no state store attached")]
    NotInitialized,

    #[error("failed to persist state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timed out after {timeout:?} waiting for lock '{name}'")]
    LockTimeout { name: String, timeout: Duration },

    #[error("lock '{name}' is not held by this lease")]
    LockNotHeld { name: String },

    #[error("invalid state: {0}")]
    Invalid(#[from] StateValidationError),

    #[error("certificate '{0}' not found")]
    CertificateNotFound(CertificateId),

    #[error("site '{0}' not found")]
    SiteNotFound(String),

    #[error("site '{0}' already exists")]
    SiteExists(String),

    #[error("state backend error: {0}")]
    Backend(String),
}
