//! Lifecycle of the node-facing RPC server.
//!
//! Stopping cancels the server token so every open stream returns, waits up
//! to the grace period for streams to drain, and aborts whatever is left.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, info, trace, warn};

use sitefleet_protocol::{NodeRegistry, StateProvider, StateServer, StreamTracker};

/// RPC service lifecycle errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to bind RPC listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("RPC server is already running on {0}")]
    AlreadyRunning(SocketAddr),
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: StreamTracker,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

/// Owns the gRPC server task
pub struct RpcService {
    provider: Arc<dyn StateProvider>,
    registry: NodeRegistry,
    grace: Duration,
    running: Option<RunningServer>,
}

impl RpcService {
    pub fn new(provider: Arc<dyn StateProvider>, registry: NodeRegistry, grace: Duration) -> Self {
        Self {
            provider,
            registry,
            grace,
            running: None,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Open streams on the running server
    pub fn active_streams(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |r| r.tracker.active_count())
    }

    /// Bind `addr` and start serving.
    pub async fn start(&mut self, addr: &str) -> Result<SocketAddr, RpcError> {
        if let Some(running) = &self.running {
            return Err(RpcError::AlreadyRunning(running.addr));
        }

        let bind_error = |source| RpcError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        let shutdown = CancellationToken::new();
        let tracker = StreamTracker::new();
        let server = StateServer::new(
            Arc::clone(&self.provider),
            self.registry.clone(),
            tracker.clone(),
            shutdown.clone(),
        );

        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            Server::builder()
                .add_service(server.into_service())
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    signal.cancelled().await
                })
                .await
        });

        info!(address = %local, "RPC server listening");
        self.running = Some(RunningServer {
            addr: local,
            shutdown,
            tracker,
            handle,
        });
        Ok(local)
    }

    /// Stop serving; a no-op when not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        info!(
            address = %running.addr,
            active_streams = running.tracker.active_count(),
            grace_secs = self.grace.as_secs(),
            "Stopping RPC server"
        );
        running.shutdown.cancel();

        if !running.tracker.wait_for_drain(self.grace).await {
            warn!("RPC streams did not drain within the grace period");
        }

        let mut handle = running.handle;
        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(Ok(()))) => debug!("RPC server exited"),
            Ok(Ok(Err(e))) => warn!(error = %e, "RPC server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "RPC server task failed"),
            Err(_) => {
                warn!("RPC server did not stop in time, aborting");
                handle.abort();
            }
        }
        info!(address = %running.addr, "RPC server stopped");
    }

    /// Drain the current server and rebind on `addr`.
    pub async fn restart(&mut self, addr: &str) -> Result<SocketAddr, RpcError> {
        self.stop().await;
        self.start(addr).await
    }
}

/// Ask every connected node for a health report each `every` until
/// `shutdown` is cancelled.
///
/// Reports arrive on the nodes' health channels and are recorded by the
/// server as they come in.
pub async fn probe_nodes(registry: NodeRegistry, every: Duration, shutdown: CancellationToken) {
    info!(interval_secs = every.as_secs(), "Starting node health probes");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let scheduled = registry.probe_all();
                trace!(scheduled, "Health probe round");
            }
            _ = shutdown.cancelled() => {
                info!("Node health probes stopped");
                return;
            }
        }
    }
}

impl Drop for RpcService {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("address", &self.local_addr())
            .field("grace", &self.grace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FileStore, StateManager};

    async fn service() -> (tempfile::TempDir, RpcService) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateManager::new());
        state
            .init(Arc::new(FileStore::new(dir.path().join("state.json"))))
            .await
            .unwrap();
        let service = RpcService::new(state, NodeRegistry::new(), Duration::from_secs(2));
        (dir, service)
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let (_dir, mut service) = service().await;

        let addr = service.start("127.0.0.1:0").await.unwrap();
        assert_eq!(service.local_addr(), Some(addr));
        assert!(matches!(
            service.start("127.0.0.1:0").await,
            Err(RpcError::AlreadyRunning(_))
        ));

        let restarted = service.restart("127.0.0.1:0").await.unwrap();
        assert_eq!(service.local_addr(), Some(restarted));

        service.stop().await;
        assert!(service.local_addr().is_none());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let (_dir, mut service) = service().await;
        assert!(matches!(
            service.start("not-an-address").await,
            Err(RpcError::Bind { .. })
        ));
        assert!(service.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_periodic_probes_feed_site_health() {
        use sitefleet_protocol::{NodeHealth, StateClient};

        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateManager::new());
        state
            .init(Arc::new(FileStore::new(dir.path().join("state.json"))))
            .await
            .unwrap();
        let mut service = RpcService::new(state.clone(), NodeRegistry::new(), Duration::from_secs(1));
        let addr = service.start("127.0.0.1:0").await.unwrap();

        let shutdown = CancellationToken::new();
        let mut client = StateClient::connect(format!("http://{}", addr), "edge-1")
            .await
            .unwrap();
        let token = shutdown.clone();
        tokio::spawn(async move {
            client
                .run_health_channel(
                    || NodeHealth::healthy("edge-1").with_site("a.example", Some("502".to_string())),
                    token,
                )
                .await
        });
        tokio::spawn(probe_nodes(
            service.registry().clone(),
            Duration::from_millis(20),
            shutdown.child_token(),
        ));

        let recorded = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(error) = state.get_all_sites_health().get("a.example") {
                    return error.clone();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(recorded, Some("502".to_string()));

        shutdown.cancel();
        service.stop().await;
    }
}
