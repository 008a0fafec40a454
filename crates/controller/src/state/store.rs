//! Storage backend contract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use sitefleet_common::NodeState;

use super::StateError;

/// Invoked with state committed by another controller instance.
pub type StateUpdateCallback = Arc<dyn Fn(NodeState) + Send + Sync>;

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub name: String,
    /// Backend-specific holder token
    pub token: u64,
    /// When the lease lapses on its own; `None` for backends without expiry
    pub expires_at: Option<Instant>,
}

impl LockLease {
    /// A lease that guards nothing, for single-writer backends.
    pub fn noop(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: 0,
            expires_at: None,
        }
    }
}

/// Persistence backend for [`NodeState`].
///
/// Both variants satisfy the same "read-modify-write under lock" contract.
/// Single-writer backends hand out no-op leases; clustered backends
/// implement real mutual exclusion with expiring leases.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Load the last written state, `None` if nothing was ever written.
    async fn load(&self) -> Result<Option<NodeState>, StateError>;

    /// Persist `state`; on error nothing is considered written.
    async fn save(&self, state: &NodeState) -> Result<(), StateError>;

    /// Persist `state` only while `lease` is still the live holder of its lock.
    ///
    /// Backends whose leases cannot lapse simply save.
    async fn save_fenced(&self, state: &NodeState, _lease: &LockLease) -> Result<(), StateError> {
        self.save(state).await
    }

    async fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<LockLease, StateError>;

    async fn release_lock(&self, lease: LockLease) -> Result<(), StateError>;

    /// Whether this process may run singleton maintenance work.
    async fn is_leader(&self) -> bool;

    /// Register a callback for state written by other instances.
    fn on_state_update(&self, _callback: StateUpdateCallback) {}
}
