//! The state manager.
//!
//! Holds the single in-memory [`NodeState`] snapshot. Every mutation is a
//! full replacement: validate, persist through the attached store, swap the
//! snapshot, then broadcast. A failed write leaves memory untouched.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use sitefleet_common::{
    Broadcaster, CertificateId, CertificateRecord, CertificateType, DhParams, NodeState,
    SiteState, SubscriberId, Subscription,
};
use sitefleet_protocol::{ProtocolError, StateProvider};

use super::store::{LockLease, StateStore};
use super::StateError;
use crate::certs;

/// Lock guarding read-modify-write of the whole snapshot
pub const STATE_LOCK: &str = "state";

const STATE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// RFC 7919 ffdhe2048 group, served until real parameters are generated.
pub const DEFAULT_DH_PARAMS_PEM: &str = "-----BEGIN DH PARAMETERS-----
MIIBCAKCAQEA//////////+t+FRYortKmq/cViAnPTzx2LnFg84tNpWp4TZBFGQz
+8yTnc4kmz75fS/jY2MMddj2gbICrsRhetPfHtXV/WVhJDP1H18GbtCFY2VVPe0a
87VXE15/V8k1mE8McODmi3fipona8+/och3xWKE2rec1MKzKT0g6eXq8CrGCsyT7
YdEIqUuyyOP7uWrat2DX9GgdT0Kj3jlN9K5W7edjcrsZCwenyO4KbXCeAvzhzffi
7MA0BM0oNC9hkXL+nOmFg/+OTxIy7vKBg8P+OxtMb61zO7X8vC7CIAXFjvGDfRaD
ssbzSibBsu/6iGtCOGEoXJf//////////wIBAg==
-----END DH PARAMETERS-----
";

/// Owner of the authoritative snapshot.
pub struct StateManager {
    store: RwLock<Option<Arc<dyn StateStore>>>,
    snapshot: ArcSwap<NodeState>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
    signal: Broadcaster,
    /// Latest probe result per domain; never persisted
    health: RwLock<HashMap<String, Option<String>>>,
    /// Held across every read-modify-write and persist-then-swap in this process
    write_lock: Mutex<()>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(None),
            snapshot: ArcSwap::from_pointee(NodeState::new()),
            last_updated: RwLock::new(None),
            signal: Broadcaster::new(),
            health: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Attach a backend and load the last written state.
    pub async fn init(self: &Arc<Self>, store: Arc<dyn StateStore>) -> Result<(), StateError> {
        let loaded = store.load().await?;
        let fresh = loaded.is_none();
        let state = loaded.unwrap_or_default();

        info!(
            backend = store.name(),
            sites = state.sites.len(),
            certificates = state.certificates.len(),
            fresh,
            "State loaded"
        );

        self.snapshot.store(Arc::new(state));

        let weak: Weak<Self> = Arc::downgrade(self);
        store.on_state_update(Arc::new(move |state| {
            if let Some(manager) = weak.upgrade() {
                manager.apply_external(state);
            }
        }));

        *self.store.write() = Some(store);
        self.signal.broadcast();
        Ok(())
    }

    fn store(&self) -> Result<Arc<dyn StateStore>, StateError> {
        self.store.read().clone().ok_or(StateError::NotInitialized)
    }

    fn apply_external(&self, state: NodeState) {
        debug!(sites = state.sites.len(), "Applying state committed by another controller");
        self.snapshot.store(Arc::new(state));
        self.signal.broadcast();
    }

    /// Shared handle to the current snapshot.
    pub fn snapshot(&self) -> Result<Arc<NodeState>, StateError> {
        self.store()?;
        Ok(self.snapshot.load_full())
    }

    /// Copy of the current snapshot.
    pub fn dump_state(&self) -> Result<NodeState, StateError> {
        Ok(NodeState::clone(&*self.snapshot()?))
    }

    /// Validate, persist and publish `state`.
    ///
    /// Last writer wins; use [`StateManager::update`] to build on the
    /// current snapshot.
    pub async fn replace_state(&self, state: NodeState) -> Result<(), StateError> {
        let store = self.store()?;
        let guard = self.write_lock.lock().await;
        self.commit(&guard, store.as_ref(), state, None).await
    }

    /// Persist and swap in `state`. The caller holds `write_lock`.
    async fn commit(
        &self,
        _guard: &MutexGuard<'_, ()>,
        store: &dyn StateStore,
        state: NodeState,
        lease: Option<&LockLease>,
    ) -> Result<(), StateError> {
        state.validate()?;
        match lease {
            Some(lease) => store.save_fenced(&state, lease).await?,
            None => store.save(&state).await?,
        }

        self.snapshot.store(Arc::new(state));
        *self.last_updated.write() = Some(Utc::now());

        trace!(subscribers = self.signal.subscriber_count(), "State replaced");
        self.signal.broadcast();
        Ok(())
    }

    pub async fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<LockLease, StateError> {
        self.store()?.acquire_lock(name, timeout).await
    }

    pub async fn release_lock(&self, lease: LockLease) -> Result<(), StateError> {
        self.store()?.release_lock(lease).await
    }

    /// Read-modify-write the snapshot under the state lock.
    ///
    /// The store lease excludes other controllers and `write_lock` excludes
    /// other tasks in this process for the whole read, mutate and save. A
    /// lease that lapsed before the save aborts the mutation.
    ///
    /// Must not be called while the caller already holds the state lock.
    pub async fn update<T, F>(&self, f: F) -> Result<T, StateError>
    where
        F: FnOnce(&mut NodeState) -> Result<T, StateError>,
    {
        let store = self.store()?;
        let lease = store.acquire_lock(STATE_LOCK, STATE_LOCK_TIMEOUT).await?;

        let result = async {
            let guard = self.write_lock.lock().await;
            let mut state = NodeState::clone(&self.snapshot.load());
            let out = f(&mut state)?;
            self.commit(&guard, store.as_ref(), state, Some(&lease)).await?;
            Ok::<T, StateError>(out)
        }
        .await;

        if let Err(e) = store.release_lock(lease).await {
            warn!(error = %e, "Failed to release state lock");
        }
        result
    }

    pub fn subscribe(&self) -> Subscription {
        self.signal.subscribe()
    }

    pub fn subscribe_sender(&self, sink: mpsc::Sender<()>) -> SubscriberId {
        self.signal.subscribe_sender(sink)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.signal.unsubscribe(id)
    }

    /// Time of the most recent local replacement
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.read()
    }

    // ------------------------------------------------------------------
    // Certificates
    // ------------------------------------------------------------------

    /// Key and certificate PEM for `id`.
    pub fn get_certificate(&self, id: &CertificateId) -> Result<(String, String), StateError> {
        let record = self.get_certificate_record(id)?;
        Ok((record.key_pem, record.cert_pem))
    }

    pub fn get_certificate_record(&self, id: &CertificateId) -> Result<CertificateRecord, StateError> {
        self.snapshot()?
            .certificates
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::CertificateNotFound(id.clone()))
    }

    /// Set the material for `id`; an empty key and certificate deletes it.
    pub async fn set_certificate(
        &self,
        id: &CertificateId,
        key_pem: &str,
        cert_pem: &str,
    ) -> Result<(), StateError> {
        if key_pem.is_empty() && cert_pem.is_empty() {
            return self
                .update(|state| {
                    if state.certificates.remove(id).is_some() {
                        debug!(certificate_id = %id, "Certificate deleted");
                    }
                    Ok(())
                })
                .await;
        }

        self.update(|state| {
            let cert_type = state
                .certificates
                .get(id)
                .map(|existing| existing.cert_type)
                .unwrap_or_default();
            let record = describe_or_bare(cert_type, key_pem, cert_pem);
            state.certificates.insert(id.clone(), record);
            Ok(())
        })
        .await
    }

    /// Store `record` under a fresh ID.
    pub async fn store_certificate(&self, record: CertificateRecord) -> Result<CertificateId, StateError> {
        let id = CertificateId::new();
        self.update(|state| {
            state.certificates.insert(id.clone(), record);
            Ok(())
        })
        .await?;
        debug!(certificate_id = %id, "Certificate stored");
        Ok(id)
    }

    /// Repoint every site referencing `old` to `new`; returns the number of sites changed.
    pub async fn replace_certificate(
        &self,
        old: &CertificateId,
        new: &CertificateId,
    ) -> Result<usize, StateError> {
        self.update(|state| {
            if !state.certificates.contains_key(new) {
                return Err(StateError::CertificateNotFound(new.clone()));
            }
            let mut changed = 0;
            for site in &mut state.sites {
                let mut touched = false;
                for slot in [&mut site.generated_tls_id, &mut site.imported_tls_id] {
                    if slot.as_ref() == Some(old) {
                        *slot = Some(new.clone());
                        touched = true;
                    }
                }
                if touched {
                    changed += 1;
                }
            }
            Ok(changed)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Site health
    // ------------------------------------------------------------------

    pub fn set_site_health(&self, domain: &str, error: Option<String>) {
        self.health.write().insert(domain.to_ascii_lowercase(), error);
    }

    /// Copy of every site's last reported health.
    pub fn get_all_sites_health(&self) -> HashMap<String, Option<String>> {
        self.health.read().clone()
    }

    // ------------------------------------------------------------------
    // DH parameters
    // ------------------------------------------------------------------

    /// Stored DH parameters, or the built-in default with no date.
    pub fn get_dh_params(&self) -> DhParams {
        let stored = self.snapshot.load().dh_params.clone();
        match stored {
            Some(params) if is_valid_dh_pem(&params.pem) => params,
            Some(_) => {
                warn!("Stored DH parameters are malformed, serving defaults");
                default_dh_params()
            }
            None => default_dh_params(),
        }
    }

    pub async fn set_dh_params(&self, pem: String, date: DateTime<Utc>) -> Result<(), StateError> {
        self.update(|state| {
            state.dh_params = Some(DhParams {
                pem,
                date: Some(date),
            });
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    /// Site whose primary domain or alias is `domain`.
    pub fn get_site(&self, domain: &str) -> Option<SiteState> {
        self.snapshot.load().site(domain).cloned()
    }

    pub async fn add_site(&self, site: SiteState) -> Result<(), StateError> {
        self.update(|state| {
            if let Some(taken) = site.all_domains().into_iter().find(|d| state.site(d).is_some()) {
                return Err(StateError::SiteExists(taken));
            }
            info!(domain = %site.domain, "Site added");
            state.sites.push(site);
            Ok(())
        })
        .await
    }

    /// Remove a site along with the certificates only it referenced.
    pub async fn remove_site(&self, domain: &str) -> Result<SiteState, StateError> {
        self.update(|state| {
            let index = state
                .sites
                .iter()
                .position(|s| s.matches(domain))
                .ok_or_else(|| StateError::SiteNotFound(domain.to_string()))?;
            let site = state.sites.remove(index);

            for id in [&site.generated_tls_id, &site.imported_tls_id]
                .into_iter()
                .flatten()
            {
                if !state.is_referenced(id) {
                    state.certificates.remove(id);
                }
            }
            info!(domain = %site.domain, "Site removed");
            Ok(site)
        })
        .await
    }

    /// Whether this controller may run singleton work.
    pub async fn is_leader(&self) -> bool {
        match self.store() {
            Ok(store) => store.is_leader().await,
            Err(_) => false,
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("initialized", &self.store.read().is_some())
            .field("last_updated", &self.last_updated())
            .field("subscribers", &self.signal.subscriber_count())
            .finish()
    }
}

impl StateProvider for StateManager {
    fn current_state(&self) -> Result<Arc<NodeState>, ProtocolError> {
        self.snapshot()
            .map_err(|e| ProtocolError::StateUnavailable(e.to_string()))
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        StateManager::last_updated(self)
    }

    fn subscribe(&self) -> Subscription {
        StateManager::subscribe(self)
    }

    fn record_site_health(&self, domain: &str, error: Option<String>) {
        self.set_site_health(domain, error);
    }
}

fn default_dh_params() -> DhParams {
    DhParams {
        pem: DEFAULT_DH_PARAMS_PEM.to_string(),
        date: None,
    }
}

pub(crate) fn is_valid_dh_pem(data: &str) -> bool {
    match pem::parse(data) {
        Ok(block) => {
            block.tag() == "DH PARAMETERS"
                && !block.contents().is_empty()
                && block.contents().iter().any(|b| *b != 0)
        }
        Err(_) => false,
    }
}

fn describe_or_bare(cert_type: CertificateType, key_pem: &str, cert_pem: &str) -> CertificateRecord {
    match certs::describe_certificate(cert_type, key_pem, cert_pem) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "Storing certificate without parsed metadata");
            CertificateRecord::from_pem(cert_type, key_pem, cert_pem)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileStore;
    use async_trait::async_trait;
    use proptest::prelude::*;

    struct MemoryStore {
        state: parking_lot::Mutex<Option<NodeState>>,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                state: parking_lot::Mutex::new(None),
                fail_writes: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_writes: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl StateStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn load(&self) -> Result<Option<NodeState>, StateError> {
            Ok(self.state.lock().clone())
        }

        async fn save(&self, state: &NodeState) -> Result<(), StateError> {
            if self.fail_writes {
                return Err(StateError::Backend("disk full".to_string()));
            }
            *self.state.lock() = Some(state.clone());
            Ok(())
        }

        async fn acquire_lock(&self, name: &str, _timeout: Duration) -> Result<LockLease, StateError> {
            Ok(LockLease::noop(name))
        }

        async fn release_lock(&self, _lease: LockLease) -> Result<(), StateError> {
            Ok(())
        }

        async fn is_leader(&self) -> bool {
            true
        }
    }

    async fn manager() -> Arc<StateManager> {
        let manager = Arc::new(StateManager::new());
        manager.init(Arc::new(MemoryStore::new())).await.unwrap();
        manager
    }

    fn state_with(domains: &[String]) -> NodeState {
        let mut state = NodeState::new();
        for domain in domains {
            state.sites.push(SiteState::new(domain.clone()));
        }
        state
    }

    #[test]
    fn test_dump_requires_store() {
        let manager = StateManager::new();
        assert!(matches!(manager.dump_state(), Err(StateError::NotInitialized)));
    }

    proptest! {
        #[test]
        fn test_last_replace_wins(
            writes in prop::collection::vec(
                prop::collection::btree_set("[a-z]{1,8}\\.example", 0..4),
                1..6,
            )
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let manager = manager().await;
                let mut last = NodeState::new();
                for domains in &writes {
                    let domains: Vec<String> = domains.iter().cloned().collect();
                    last = state_with(&domains);
                    manager.replace_state(last.clone()).await.unwrap();
                }
                prop_assert_eq!(manager.dump_state().unwrap(), last);
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let manager = Arc::new(StateManager::new());
        manager.init(Arc::new(MemoryStore::failing())).await.unwrap();
        let mut sub = manager.subscribe();
        sub.try_changed();

        let result = manager
            .replace_state(state_with(&["a.example".to_string()]))
            .await;

        assert!(matches!(result, Err(StateError::Backend(_))));
        assert!(manager.dump_state().unwrap().sites.is_empty());
        assert!(manager.last_updated().is_none());
        assert!(!sub.try_changed());
    }

    #[tokio::test]
    async fn test_invalid_state_rejected() {
        let manager = manager().await;
        let state = state_with(&["a.example".to_string(), "A.example".to_string()]);

        assert!(matches!(
            manager.replace_state(state).await,
            Err(StateError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_broadcasts_once_per_drain() {
        let manager = manager().await;
        let mut sub = manager.subscribe();

        manager.replace_state(NodeState::new()).await.unwrap();
        assert!(sub.try_changed());
        assert!(!sub.try_changed());

        manager.replace_state(NodeState::new()).await.unwrap();
        manager.replace_state(NodeState::new()).await.unwrap();
        assert!(sub.try_changed());
        assert!(!sub.try_changed());
    }

    #[tokio::test]
    async fn test_delete_certificate() {
        let manager = manager().await;
        let id = manager
            .store_certificate(CertificateRecord::from_pem(CertificateType::SelfSigned, "k", "c"))
            .await
            .unwrap();
        assert_eq!(
            manager.get_certificate(&id).unwrap(),
            ("k".to_string(), "c".to_string())
        );

        manager.set_certificate(&id, "", "").await.unwrap();
        assert!(matches!(
            manager.get_certificate(&id),
            Err(StateError::CertificateNotFound(_))
        ));

        // Deleting again is a no-op
        manager.set_certificate(&id, "", "").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_certificate_keeps_type() {
        let manager = manager().await;
        let id = manager
            .store_certificate(CertificateRecord::from_pem(CertificateType::Acme, "k", "c"))
            .await
            .unwrap();

        manager.set_certificate(&id, "k2", "not a pem").await.unwrap();
        let record = manager.get_certificate_record(&id).unwrap();
        assert_eq!(record.cert_type, CertificateType::Acme);
        assert_eq!(record.key_pem, "k2");
    }

    #[tokio::test]
    async fn test_replace_certificate_repoints_sites() {
        let manager = manager().await;
        let old = manager
            .store_certificate(CertificateRecord::from_pem(CertificateType::SelfSigned, "k", "c"))
            .await
            .unwrap();
        let new = manager
            .store_certificate(CertificateRecord::from_pem(CertificateType::SelfSigned, "k2", "c2"))
            .await
            .unwrap();

        let mut site = SiteState::new("a.example");
        site.generated_tls_id = Some(old.clone());
        manager.add_site(site).await.unwrap();
        manager.add_site(SiteState::new("b.example")).await.unwrap();

        assert_eq!(manager.replace_certificate(&old, &new).await.unwrap(), 1);
        assert_eq!(
            manager.get_site("a.example").unwrap().generated_tls_id,
            Some(new.clone())
        );

        manager.set_certificate(&old, "", "").await.unwrap();
        assert!(manager.dump_state().unwrap().validate().is_ok());

        let missing = CertificateId::from("missing");
        assert!(matches!(
            manager.replace_certificate(&new, &missing).await,
            Err(StateError::CertificateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_referenced_certificate_cannot_be_deleted() {
        let manager = manager().await;
        let id = manager
            .store_certificate(CertificateRecord::from_pem(CertificateType::SelfSigned, "k", "c"))
            .await
            .unwrap();
        let mut site = SiteState::new("a.example");
        site.generated_tls_id = Some(id.clone());
        manager.add_site(site).await.unwrap();

        assert!(matches!(
            manager.set_certificate(&id, "", "").await,
            Err(StateError::Invalid(_))
        ));
        assert!(manager.get_certificate(&id).is_ok());
    }

    #[tokio::test]
    async fn test_sites() {
        let manager = manager().await;
        manager
            .add_site(SiteState::new("a.example").with_aliases(["www.a.example"]))
            .await
            .unwrap();

        assert!(matches!(
            manager.add_site(SiteState::new("www.a.example")).await,
            Err(StateError::SiteExists(_))
        ));
        assert_eq!(manager.get_site("www.a.example").unwrap().domain, "a.example");

        manager.remove_site("a.example").await.unwrap();
        assert!(manager.get_site("a.example").is_none());
        assert!(matches!(
            manager.remove_site("a.example").await,
            Err(StateError::SiteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_site_drops_its_certificates() {
        let manager = manager().await;
        let id = manager
            .store_certificate(CertificateRecord::from_pem(CertificateType::SelfSigned, "k", "c"))
            .await
            .unwrap();
        let mut site = SiteState::new("a.example");
        site.generated_tls_id = Some(id.clone());
        manager.add_site(site).await.unwrap();

        manager.remove_site("a.example").await.unwrap();
        assert!(manager.get_certificate(&id).is_err());
    }

    #[tokio::test]
    async fn test_site_health_is_copied() {
        let manager = manager().await;
        manager.set_site_health("A.example", Some("timeout".to_string()));
        manager.set_site_health("b.example", None);

        let mut health = manager.get_all_sites_health();
        assert_eq!(health.get("a.example"), Some(&Some("timeout".to_string())));
        health.clear();
        assert_eq!(manager.get_all_sites_health().len(), 2);
    }

    #[tokio::test]
    async fn test_dh_params_default_fallback() {
        let manager = manager().await;
        let params = manager.get_dh_params();
        assert_eq!(params.pem, DEFAULT_DH_PARAMS_PEM);
        assert!(params.date.is_none());
        assert!(is_valid_dh_pem(DEFAULT_DH_PARAMS_PEM));

        let mut state = NodeState::new();
        state.dh_params = Some(DhParams {
            pem: "garbage".to_string(),
            date: Some(Utc::now()),
        });
        manager.replace_state(state).await.unwrap();
        assert_eq!(manager.get_dh_params().pem, DEFAULT_DH_PARAMS_PEM);

        let now = Utc::now();
        manager
            .set_dh_params(DEFAULT_DH_PARAMS_PEM.to_string(), now)
            .await
            .unwrap();
        assert_eq!(manager.get_dh_params().date, Some(now));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(StateManager::new());
        manager
            .init(Arc::new(FileStore::new(dir.path().join("state.json"))))
            .await
            .unwrap();

        let writers: Vec<_> = (0..20)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.add_site(SiteState::new(format!("s{}.example", i))).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(manager.snapshot().unwrap().sites.len(), 20);
        let persisted = FileStore::new(dir.path().join("state.json")).load().await.unwrap().unwrap();
        assert_eq!(persisted.sites.len(), 20);
    }

    #[tokio::test]
    async fn test_init_loads_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let first = Arc::new(StateManager::new());
        first.init(Arc::new(FileStore::new(&path))).await.unwrap();
        first.add_site(SiteState::new("a.example")).await.unwrap();

        let second = Arc::new(StateManager::new());
        second.init(Arc::new(FileStore::new(&path))).await.unwrap();
        assert!(second.get_site("a.example").is_some());
    }

    #[tokio::test]
    async fn test_provider_reports_unavailable_before_init() {
        let manager = StateManager::new();
        assert!(matches!(
            manager.current_state(),
            Err(ProtocolError::StateUnavailable(_))
        ));
    }
}
