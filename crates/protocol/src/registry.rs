//! Connection registry for nodes attached through the health channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use sitefleet_common::NodeId;

use crate::errors::ProtocolError;
use crate::health::{NodeHealth, NodeInfo};

/// Probes queued per node; one pending probe is enough since answers are
/// "most recent report" only.
const PROBE_QUEUE: usize = 1;

/// A scheduled health probe.
#[derive(Debug)]
pub(crate) struct ProbeRequest {
    /// Where to deliver the answering report, if anyone is waiting
    pub(crate) reply: Option<oneshot::Sender<NodeHealth>>,
}

struct NodeEntry {
    info: NodeInfo,
    probes: mpsc::Sender<ProbeRequest>,
}

/// Nodes currently connected to this controller
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<NodeId, NodeEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; fails if the ID is already attached.
    pub(crate) fn register(
        &self,
        id: NodeId,
        name: impl Into<String>,
    ) -> Result<mpsc::Receiver<ProbeRequest>, ProtocolError> {
        match self.nodes.entry(id.clone()) {
            Entry::Occupied(_) => Err(ProtocolError::AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(PROBE_QUEUE);
                let name = name.into();
                info!(node_id = %id, node_name = %name, "Node attached");
                slot.insert(NodeEntry {
                    info: NodeInfo {
                        id,
                        name,
                        connected_at: Utc::now(),
                        last_health: None,
                    },
                    probes: tx,
                });
                Ok(rx)
            }
        }
    }

    pub(crate) fn deregister(&self, id: &NodeId) -> bool {
        let removed = self.nodes.remove(id).is_some();
        if removed {
            info!(node_id = %id, "Node detached");
        }
        removed
    }

    pub(crate) fn record_health(&self, id: &NodeId, health: NodeHealth) {
        if let Some(mut entry) = self.nodes.get_mut(id) {
            trace!(node_id = %id, sequence = health.sequence, "Recorded health report");
            entry.info.last_health = Some(health);
        }
    }

    /// Snapshot of all connected nodes
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|e| e.info.clone()).collect()
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeInfo> {
        self.nodes.get(id).map(|e| e.info.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ask a node for a health report without waiting for it.
    ///
    /// A probe that is already pending absorbs this one.
    pub fn probe(&self, id: &NodeId) -> Result<(), ProtocolError> {
        let entry = self
            .nodes
            .get(id)
            .ok_or_else(|| ProtocolError::UnknownNode(id.clone()))?;
        match entry.probes.try_send(ProbeRequest { reply: None }) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Probe every connected node; returns how many were scheduled.
    pub fn probe_all(&self) -> usize {
        let ids: Vec<NodeId> = self.nodes.iter().map(|e| e.key().clone()).collect();
        let scheduled = ids.iter().filter(|id| self.probe(id).is_ok()).count();
        debug!(scheduled, "Scheduled health probes");
        scheduled
    }

    /// Probe a node and wait for its answer.
    pub async fn request_health(
        &self,
        id: &NodeId,
        timeout: Duration,
    ) -> Result<NodeHealth, ProtocolError> {
        let probes = self
            .nodes
            .get(id)
            .map(|e| e.probes.clone())
            .ok_or_else(|| ProtocolError::UnknownNode(id.clone()))?;

        let (tx, rx) = oneshot::channel();
        tokio::time::timeout(timeout, async move {
            probes
                .send(ProbeRequest { reply: Some(tx) })
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            rx.await.map_err(|_| ProtocolError::ConnectionClosed)
        })
        .await
        .map_err(|_| ProtocolError::Timeout(timeout))?
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_registration_rejected() {
        let registry = NodeRegistry::new();
        let id = NodeId::from("node-1");

        let _rx = registry.register(id.clone(), "edge-1").unwrap();
        let err = registry.register(id.clone(), "edge-1").unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyRegistered(_)));

        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(registry.register(id, "edge-1").is_ok());
    }

    #[test]
    fn test_probe_coalesces() {
        let registry = NodeRegistry::new();
        let id = NodeId::from("node-1");
        let mut rx = registry.register(id.clone(), "edge-1").unwrap();

        registry.probe(&id).unwrap();
        registry.probe(&id).unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_probe_unknown_node() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.probe(&NodeId::from("missing")),
            Err(ProtocolError::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn test_request_health_answered() {
        let registry = NodeRegistry::new();
        let id = NodeId::from("node-1");
        let mut rx = registry.register(id.clone(), "edge-1").unwrap();

        tokio::spawn(async move {
            if let Some(probe) = rx.recv().await {
                let _ = probe.reply.unwrap().send(NodeHealth::healthy("edge-1"));
            }
        });

        let health = registry
            .request_health(&id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(health.node_name, "edge-1");
    }

    #[tokio::test]
    async fn test_request_health_times_out() {
        let registry = NodeRegistry::new();
        let id = NodeId::from("node-1");
        let _rx = registry.register(id.clone(), "edge-1").unwrap();

        let err = registry
            .request_health(&id, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)));
    }

    #[test]
    fn test_record_health() {
        let registry = NodeRegistry::new();
        let id = NodeId::from("node-1");
        let _rx = registry.register(id.clone(), "edge-1").unwrap();

        registry.record_health(&id, NodeHealth::healthy("edge-1"));
        assert!(registry.node(&id).unwrap().last_health.is_some());
        assert_eq!(registry.nodes().len(), 1);
    }
}
