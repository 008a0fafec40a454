//! Node-side client for the controller.
//!
//! Fetches and watches state, keeps a certificate cache keyed by the
//! controller's certificate IDs, and answers health probes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Streaming};
use tracing::{debug, info, trace};

use sitefleet_common::{CertificateId, NodeState};

use crate::convert::state_from_snapshot;
use crate::errors::ProtocolError;
use crate::health::NodeHealth;
use crate::proto::{self, controller_client::ControllerClient, StateSnapshot};
use crate::server::NODE_NAME_METADATA;

/// Key/cert pair cached on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertCacheItem {
    pub key_pem: String,
    pub cert_pem: String,
}

/// Outcome of applying a snapshot to the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUpdate {
    pub added: usize,
    pub evicted: usize,
}

/// Certificates cached per ID.
///
/// Registry entries are immutable, so an ID that is already cached never
/// needs refreshing; IDs missing from a newer snapshot are evicted.
#[derive(Debug, Default)]
pub struct CertCache {
    items: RwLock<HashMap<CertificateId, Arc<CertCacheItem>>>,
}

impl CertCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &CertificateId) -> Option<Arc<CertCacheItem>> {
        self.items.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Sync the cache with the registry of `state`.
    pub fn apply(&self, state: &NodeState) -> CacheUpdate {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|id, _| state.certificates.contains_key(id));
        let evicted = before - items.len();

        let mut added = 0;
        for (id, record) in &state.certificates {
            if !items.contains_key(id) {
                items.insert(
                    id.clone(),
                    Arc::new(CertCacheItem {
                        key_pem: record.key_pem.clone(),
                        cert_pem: record.cert_pem.clone(),
                    }),
                );
                added += 1;
            }
        }

        if added > 0 || evicted > 0 {
            debug!(added, evicted, cached = items.len(), "Updated certificate cache");
        }
        CacheUpdate { added, evicted }
    }
}

/// Client used by worker nodes
#[derive(Clone)]
pub struct StateClient {
    node_name: String,
    inner: ControllerClient<Channel>,
    cache: Arc<CertCache>,
}

impl StateClient {
    /// Connect to a controller, e.g. `http://controller:2265`
    pub async fn connect(
        endpoint: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", endpoint, e)))?
            .connect()
            .await?;
        info!(endpoint = %endpoint, "Connected to controller");
        Ok(Self::from_channel(channel, node_name))
    }

    pub fn from_channel(channel: Channel, node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            inner: ControllerClient::new(channel),
            cache: Arc::new(CertCache::new()),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn cache(&self) -> &Arc<CertCache> {
        &self.cache
    }

    /// Fetch the full state once.
    pub async fn get_state(&mut self) -> Result<NodeState, ProtocolError> {
        let snapshot = self
            .inner
            .get_state(proto::GetStateRequest {})
            .await?
            .into_inner();
        let (state, _) = state_from_snapshot(snapshot)?;
        self.cache.apply(&state);
        Ok(state)
    }

    /// Open a state watch; the first item is the current state.
    pub async fn watch_state(&mut self) -> Result<StateWatch, ProtocolError> {
        let stream = self
            .inner
            .watch_state(proto::WatchStateRequest {
                node_name: self.node_name.clone(),
            })
            .await?
            .into_inner();
        Ok(StateWatch {
            stream,
            cache: Arc::clone(&self.cache),
        })
    }

    /// Answer health probes until the controller closes the channel or
    /// `shutdown` is cancelled.
    pub async fn run_health_channel<F>(
        &mut self,
        report: F,
        shutdown: CancellationToken,
    ) -> Result<(), ProtocolError>
    where
        F: Fn() -> NodeHealth + Send,
    {
        let (tx, rx) = mpsc::channel(4);
        let mut request = Request::new(ReceiverStream::new(rx));
        let name = MetadataValue::try_from(self.node_name.as_str())
            .map_err(|e| ProtocolError::InvalidMessage(format!("invalid node name: {}", e)))?;
        request.metadata_mut().insert(NODE_NAME_METADATA, name);

        let mut pings = self.inner.health_channel(request).await?.into_inner();

        loop {
            let ping = tokio::select! {
                ping = pings.message() => ping?,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let Some(ping) = ping else {
                debug!("Controller closed health channel");
                return Ok(());
            };

            trace!(node_id = %ping.node_id, sequence = ping.sequence, "Answering health ping");
            let mut health = report();
            health.node_name = self.node_name.clone();
            health.sequence = ping.sequence;
            health.reported_at = Utc::now();
            if tx.send(health.into_report()).await.is_err() {
                return Err(ProtocolError::ConnectionClosed);
            }
        }
    }
}

/// An open `WatchState` stream
pub struct StateWatch {
    stream: Streaming<StateSnapshot>,
    cache: Arc<CertCache>,
}

impl StateWatch {
    /// Wait for the next pushed state; `None` when the controller ends the stream.
    pub async fn next(&mut self) -> Result<Option<(NodeState, Option<DateTime<Utc>>)>, ProtocolError> {
        match self.stream.message().await? {
            Some(snapshot) => {
                let (state, updated_at) = state_from_snapshot(snapshot)?;
                self.cache.apply(&state);
                Ok(Some((state, updated_at)))
            }
            None => Ok(None),
        }
    }
}
