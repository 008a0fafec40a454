//! Node-facing RPC server.
//!
//! Nodes keep two long-lived streams open: `WatchState` pushes a full
//! snapshot whenever the controller state changes, and `HealthChannel`
//! lets the controller ask a node for its health whenever it chooses.

use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, trace, warn};

use sitefleet_common::{NodeId, NodeState, Subscription};

use crate::convert::snapshot_from_state;
use crate::drain::StreamTracker;
use crate::errors::ProtocolError;
use crate::health::NodeHealth;
use crate::proto::{
    self, controller_server::Controller, controller_server::ControllerServer, HealthPing,
    HealthReport, StateSnapshot,
};
use crate::registry::NodeRegistry;

/// Metadata key carrying the node's name on `HealthChannel`.
pub const NODE_NAME_METADATA: &str = "x-sitefleet-node";

/// Source of the state the server distributes.
///
/// Implemented by the controller's state manager.
pub trait StateProvider: Send + Sync + 'static {
    /// The current snapshot.
    fn current_state(&self) -> Result<Arc<NodeState>, ProtocolError>;

    /// Time of the most recent local state replacement.
    fn last_updated(&self) -> Option<DateTime<Utc>>;

    /// Register a private change sink.
    fn subscribe(&self) -> Subscription;

    /// Store a site probe result reported by a node.
    fn record_site_health(&self, domain: &str, error: Option<String>);
}

/// gRPC state distribution server.
#[derive(Clone)]
pub struct StateServer {
    provider: Arc<dyn StateProvider>,
    registry: NodeRegistry,
    tracker: StreamTracker,
    shutdown: CancellationToken,
}

type SnapshotStream = Pin<Box<dyn Stream<Item = Result<StateSnapshot, Status>> + Send>>;
type PingStream = Pin<Box<dyn Stream<Item = Result<HealthPing, Status>> + Send>>;

impl StateServer {
    /// Create a server; streams end when `shutdown` is cancelled.
    pub fn new(
        provider: Arc<dyn StateProvider>,
        registry: NodeRegistry,
        tracker: StreamTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            registry,
            tracker,
            shutdown,
        }
    }

    /// Get the tonic service for this server.
    pub fn into_service(self) -> ControllerServer<StateServer> {
        ControllerServer::new(self)
    }

    fn snapshot(&self) -> Result<StateSnapshot, ProtocolError> {
        build_snapshot(self.provider.as_ref())
    }
}

fn build_snapshot(provider: &dyn StateProvider) -> Result<StateSnapshot, ProtocolError> {
    let state = provider.current_state()?;
    Ok(snapshot_from_state(&state, provider.last_updated()))
}

#[tonic::async_trait]
impl Controller for StateServer {
    type WatchStateStream = SnapshotStream;
    type HealthChannelStream = PingStream;

    async fn get_state(
        &self,
        _request: Request<proto::GetStateRequest>,
    ) -> Result<Response<StateSnapshot>, Status> {
        Ok(Response::new(self.snapshot()?))
    }

    async fn watch_state(
        &self,
        request: Request<proto::WatchStateRequest>,
    ) -> Result<Response<Self::WatchStateStream>, Status> {
        let node_name = request.into_inner().node_name;

        // Subscribe before reading so a change in between is not lost
        let subscription = self.provider.subscribe();
        let initial = self.snapshot()?;

        let (tx, rx) = mpsc::channel(4);
        let provider = Arc::clone(&self.provider);
        let shutdown = self.shutdown.clone();
        let guard = self.tracker.track();

        debug!(node_name = %node_name, "Starting state watch");

        tokio::spawn(async move {
            let _guard = guard;
            if tx.send(Ok(initial)).await.is_ok() {
                watch_loop(&node_name, subscription, provider.as_ref(), &tx, &shutdown).await;
            }
            debug!(node_name = %node_name, "State watch ended");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as Self::WatchStateStream))
    }

    async fn health_channel(
        &self,
        request: Request<Streaming<HealthReport>>,
    ) -> Result<Response<Self::HealthChannelStream>, Status> {
        let node_name = request
            .metadata()
            .get(NODE_NAME_METADATA)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let inbound = request.into_inner();

        let node_id = NodeId::new();
        let probes = self.registry.register(node_id.clone(), node_name)?;

        let (tx, rx) = mpsc::channel(4);
        let slot: ResponseSlot = Arc::new(Mutex::new(None));
        let done = self.shutdown.child_token();

        tokio::spawn(read_reports(
            inbound,
            node_id.clone(),
            Arc::clone(&slot),
            Arc::clone(&self.provider),
            self.registry.clone(),
            done.clone(),
        ));

        let registry = self.registry.clone();
        let guard = self.tracker.track();
        tokio::spawn(async move {
            let _guard = guard;
            probe_loop(&node_id, probes, slot, &tx, &done).await;
            done.cancel();
            registry.deregister(&node_id);
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as Self::HealthChannelStream))
    }
}

async fn watch_loop(
    node_name: &str,
    mut subscription: Subscription,
    provider: &dyn StateProvider,
    tx: &mpsc::Sender<Result<StateSnapshot, Status>>,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            changed = subscription.changed() => {
                if !changed {
                    return;
                }
                let snapshot = match build_snapshot(provider) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(node_name = %node_name, error = %e, "Failed to build snapshot");
                        continue;
                    }
                };
                trace!(node_name = %node_name, "Pushing state snapshot");
                if tx.send(Ok(snapshot)).await.is_err() {
                    return;
                }
            }
            _ = tx.closed() => {
                debug!(node_name = %node_name, "Node disconnected from state watch");
                return;
            }
            _ = shutdown.cancelled() => {
                return;
            }
        }
    }
}

/// Reply channel of the outstanding probe, if any.
type ResponseSlot = Arc<Mutex<Option<oneshot::Sender<NodeHealth>>>>;

async fn read_reports(
    mut inbound: Streaming<HealthReport>,
    node_id: NodeId,
    slot: ResponseSlot,
    provider: Arc<dyn StateProvider>,
    registry: NodeRegistry,
    done: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            message = inbound.next() => message,
            _ = done.cancelled() => break,
        };

        let report = match message {
            Some(Ok(report)) => report,
            Some(Err(e)) => {
                debug!(node_id = %node_id, error = %e, "Health stream error");
                break;
            }
            None => break,
        };

        let health = NodeHealth::from(report);
        for (domain, error) in &health.sites {
            provider.record_site_health(domain, error.clone());
        }
        registry.record_health(&node_id, health.clone());

        match slot.lock().take() {
            Some(reply) => {
                let _ = reply.send(health);
            }
            None => trace!(node_id = %node_id, "No probe outstanding, report dropped"),
        }
    }

    done.cancel();
}

async fn probe_loop(
    node_id: &NodeId,
    mut probes: mpsc::Receiver<crate::registry::ProbeRequest>,
    slot: ResponseSlot,
    tx: &mpsc::Sender<Result<HealthPing, Status>>,
    done: &CancellationToken,
) {
    let mut sequence = 0u64;
    loop {
        tokio::select! {
            probe = probes.recv() => {
                let Some(probe) = probe else {
                    return;
                };
                sequence += 1;
                if let Some(reply) = probe.reply {
                    *slot.lock() = Some(reply);
                }
                let ping = HealthPing {
                    node_id: node_id.to_string(),
                    sequence,
                    timestamp_ms: Utc::now().timestamp_millis(),
                };
                trace!(node_id = %node_id, sequence, "Sending health ping");
                if tx.send(Ok(ping)).await.is_err() {
                    return;
                }
            }
            _ = tx.closed() => return,
            _ = done.cancelled() => return,
        }
    }
}
