//! Clustered backend with leased locks.
//!
//! A [`ClusterBackend`] is the shared coordination service; each controller
//! instance talks to it through its own [`ClusterStore`]. Locks expire on
//! their own, so a crashed holder cannot wedge the cluster, and every
//! committed write is delivered to the other members' callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use sitefleet_common::NodeState;

use super::store::{LockLease, StateStore, StateUpdateCallback};
use super::StateError;

/// Lock name used for leader election
pub const LEADER_LOCK: &str = "leader";

/// Upper bound on a single wait for a lock release
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct HeldLock {
    holder: String,
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct ClusterInner {
    state: Option<NodeState>,
    locks: HashMap<String, HeldLock>,
    members: Vec<(String, StateUpdateCallback)>,
}

/// Shared coordination service for a controller cluster
#[derive(Clone, Default)]
pub struct ClusterBackend {
    inner: Arc<Mutex<ClusterInner>>,
    released: Arc<Notify>,
    next_token: Arc<AtomicU64>,
}

impl ClusterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new member with the given lease TTL.
    pub fn connect(&self, lease_ttl: Duration) -> ClusterStore {
        let member = Uuid::new_v4().to_string();
        info!(member = %member, lease_ttl_ms = lease_ttl.as_millis(), "Cluster member connected");
        ClusterStore {
            backend: self.clone(),
            member,
            lease_ttl,
        }
    }

    fn try_acquire(&self, member: &str, name: &str, ttl: Duration) -> Option<LockLease> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if let Some(held) = inner.locks.get(name) {
            if held.expires_at > now {
                return None;
            }
            debug!(lock = %name, previous_holder = %held.holder, "Taking over expired lease");
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let expires_at = now + ttl;
        inner.locks.insert(
            name.to_string(),
            HeldLock {
                holder: member.to_string(),
                token,
                expires_at,
            },
        );
        Some(LockLease {
            name: name.to_string(),
            token,
            expires_at: Some(expires_at),
        })
    }
}

/// One controller's view of a [`ClusterBackend`]
#[derive(Clone)]
pub struct ClusterStore {
    backend: ClusterBackend,
    member: String,
    lease_ttl: Duration,
}

impl ClusterStore {
    pub fn member_id(&self) -> &str {
        &self.member
    }

    /// Write `state` and hand it to the other members.
    ///
    /// With a `fence`, the write is refused unless that lease still holds
    /// its lock; the check and the write happen under one backend lock.
    fn commit(&self, state: &NodeState, fence: Option<&LockLease>) -> Result<(), StateError> {
        let callbacks: Vec<StateUpdateCallback> = {
            let mut inner = self.backend.inner.lock();
            if let Some(lease) = fence {
                let live = inner.locks.get(&lease.name).is_some_and(|held| {
                    held.token == lease.token && held.expires_at > Instant::now()
                });
                if !live {
                    warn!(member = %self.member, lock = %lease.name, token = lease.token, "Refusing write under a lapsed lease");
                    return Err(StateError::LockNotHeld {
                        name: lease.name.clone(),
                    });
                }
            }
            inner.state = Some(state.clone());
            inner
                .members
                .iter()
                .filter(|(member, _)| member != &self.member)
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        trace!(member = %self.member, peers = callbacks.len(), "Committed cluster state");
        for callback in callbacks {
            callback(state.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for ClusterStore {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn load(&self) -> Result<Option<NodeState>, StateError> {
        Ok(self.backend.inner.lock().state.clone())
    }

    async fn save(&self, state: &NodeState) -> Result<(), StateError> {
        self.commit(state, None)
    }

    async fn save_fenced(&self, state: &NodeState, lease: &LockLease) -> Result<(), StateError> {
        self.commit(state, Some(lease))
    }

    async fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<LockLease, StateError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.backend.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.backend.try_acquire(&self.member, name, self.lease_ttl) {
                trace!(member = %self.member, lock = %name, token = lease.token, "Lock acquired");
                return Ok(lease);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(StateError::LockTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }

            // Expired leases free the lock without a notification
            let _ = tokio::time::timeout(remaining.min(LOCK_POLL_INTERVAL), notified).await;
        }
    }

    async fn release_lock(&self, lease: LockLease) -> Result<(), StateError> {
        {
            let mut inner = self.backend.inner.lock();
            match inner.locks.get(&lease.name) {
                Some(held) if held.token == lease.token => {
                    inner.locks.remove(&lease.name);
                }
                _ => {
                    return Err(StateError::LockNotHeld { name: lease.name });
                }
            }
        }
        trace!(member = %self.member, lock = %lease.name, "Lock released");
        self.backend.released.notify_waiters();
        Ok(())
    }

    async fn is_leader(&self) -> bool {
        let now = Instant::now();
        {
            let mut inner = self.backend.inner.lock();
            if let Some(held) = inner.locks.get_mut(LEADER_LOCK) {
                if held.holder == self.member && held.expires_at > now {
                    held.expires_at = now + self.lease_ttl;
                    return true;
                }
            }
        }

        let elected = self
            .backend
            .try_acquire(&self.member, LEADER_LOCK, self.lease_ttl)
            .is_some();
        if elected {
            info!(member = %self.member, "Acquired cluster leadership");
        }
        elected
    }

    fn on_state_update(&self, callback: StateUpdateCallback) {
        self.backend
            .inner
            .lock()
            .members
            .push((self.member.clone(), callback));
    }
}

impl std::fmt::Debug for ClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStore")
            .field("member", &self.member)
            .field("lease_ttl", &self.lease_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use sitefleet_common::SiteState;

    #[tokio::test]
    async fn test_lock_contention() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_secs(30));
        let b = backend.connect(Duration::from_secs(30));

        let lease = a.acquire_lock("state", Duration::from_secs(1)).await.unwrap();
        let err = b
            .acquire_lock("state", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::LockTimeout { .. }));

        a.release_lock(lease).await.unwrap();
        assert!(b.acquire_lock("state", Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_secs(30));
        let b = backend.connect(Duration::from_secs(30));

        let lease = a.acquire_lock("state", Duration::from_secs(1)).await.unwrap();
        let waiter = tokio::spawn(async move { b.acquire_lock("state", Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        a.release_lock(lease).await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_millis(50));
        let b = backend.connect(Duration::from_secs(30));

        let stale = a.acquire_lock("state", Duration::from_secs(1)).await.unwrap();
        assert!(b.acquire_lock("state", Duration::from_secs(1)).await.is_ok());

        // The old holder can no longer release what it lost
        assert!(matches!(
            a.release_lock(stale).await,
            Err(StateError::LockNotHeld { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_leader() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_secs(30));
        let b = backend.connect(Duration::from_secs(30));

        assert!(a.is_leader().await);
        assert!(a.is_leader().await);
        assert!(!b.is_leader().await);
    }

    #[tokio::test]
    async fn test_leadership_moves_after_expiry() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_millis(30));
        let b = backend.connect(Duration::from_millis(30));

        assert!(a.is_leader().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.is_leader().await);
        assert!(!a.is_leader().await);
    }

    #[tokio::test]
    async fn test_writes_reach_other_members() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_secs(30));
        let b = backend.connect(Duration::from_secs(30));

        let seen_by_a = Arc::new(AtomicUsize::new(0));
        let seen_by_b = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen_by_a);
        a.on_state_update(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&seen_by_b);
        b.on_state_update(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let mut state = NodeState::new();
        state.sites.push(SiteState::new("a.example"));
        a.save(&state).await.unwrap();

        assert_eq!(seen_by_a.load(Ordering::SeqCst), 0);
        assert_eq!(seen_by_b.load(Ordering::SeqCst), 1);
        assert_eq!(b.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_fenced_write_rejected_after_takeover() {
        let backend = ClusterBackend::new();
        let a = backend.connect(Duration::from_millis(30));
        let b = backend.connect(Duration::from_secs(30));

        let stale = a.acquire_lock("state", Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let current = b.acquire_lock("state", Duration::from_secs(1)).await.unwrap();

        let mut state = NodeState::new();
        state.sites.push(SiteState::new("late.example"));
        assert!(matches!(
            a.save_fenced(&state, &stale).await,
            Err(StateError::LockNotHeld { .. })
        ));
        assert_eq!(b.load().await.unwrap(), None);

        b.save_fenced(&state, &current).await.unwrap();
        assert_eq!(a.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_update_aborts_when_lease_lapses() {
        use crate::state::StateManager;

        let backend = ClusterBackend::new();
        let manager = Arc::new(StateManager::new());
        manager
            .init(Arc::new(backend.connect(Duration::from_millis(30))))
            .await
            .unwrap();

        let err = manager
            .update(|state| {
                // Outlive the lease while mutating
                std::thread::sleep(Duration::from_millis(60));
                state.sites.push(SiteState::new("slow.example"));
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StateError::LockNotHeld { .. }));
        assert!(manager.get_site("slow.example").is_none());
        assert!(backend.connect(Duration::from_secs(1)).load().await.unwrap().is_none());
    }
}
