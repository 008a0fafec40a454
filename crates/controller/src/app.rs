//! Controller wiring.
//!
//! Builds every component from the configuration, runs the background
//! workers under one cancellation tree and reacts to reload and shutdown
//! signals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sitefleet_config::Config;
use sitefleet_protocol::NodeRegistry;

use crate::certs::{CertificateEngine, CertificateMonitor, CertificatePolicy, DirectoryCustodialStore};
use crate::dhparams::{DhParamsWorker, OpensslDhParams};
use crate::jobs::{ControllerJobRunner, JobCoordinator, JobSpec};
use crate::notifications::Notifier;
use crate::rpc::{probe_nodes, RpcService};
use crate::signals::{SignalManager, SignalType};
use crate::state::{FileStore, StateManager};

/// A fully wired controller
pub struct SitefleetController {
    config: Config,
    config_path: Option<PathBuf>,
    state: Arc<StateManager>,
    monitor: Arc<CertificateMonitor>,
    dhparams: Arc<DhParamsWorker>,
    jobs: JobCoordinator,
    rpc: RpcService,
    shutdown: CancellationToken,
}

impl SitefleetController {
    /// Load state and build every component.
    pub async fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let state = Arc::new(StateManager::new());
        state
            .init(Arc::new(FileStore::new(&config.state.path)))
            .await
            .with_context(|| format!("Failed to load state from {}", config.state.path.display()))?;

        let notifier = Arc::new(
            Notifier::from_config(&config.notifications)
                .context("Invalid notification configuration")?,
        );

        let mut engine =
            CertificateEngine::new(Arc::clone(&state), CertificatePolicy::from(&config.certificates));
        if let Some(custodial) = &config.custodial_store {
            info!(path = %custodial.path.display(), "Using directory custodial store");
            engine = engine.with_custodial_store(Arc::new(DirectoryCustodialStore::new(&custodial.path)));
        }
        let engine = Arc::new(engine);

        let monitor = Arc::new(
            CertificateMonitor::new(Arc::clone(&state), Arc::clone(&engine), notifier)
                .with_thresholds(config.certificates.notification_days.clone())
                .with_interval(Duration::from_secs(config.certificates.monitor_interval_secs)),
        );

        let dhparams = Arc::new(DhParamsWorker::new(
            Arc::clone(&state),
            Arc::new(OpensslDhParams::new(config.dhparams.openssl_path.clone())),
            &config.dhparams,
        ));

        let jobs = JobCoordinator::new(
            Arc::clone(&state),
            Arc::new(ControllerJobRunner::new(engine, Arc::clone(&dhparams))),
        );

        let rpc = RpcService::new(
            Arc::clone(&state) as Arc<dyn sitefleet_protocol::StateProvider>,
            NodeRegistry::new(),
            Duration::from_secs(config.rpc.graceful_shutdown_timeout_secs),
        );

        Ok(Self {
            config,
            config_path,
            state,
            monitor,
            dhparams,
            jobs,
            rpc,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    /// Serve until SIGTERM or SIGINT.
    pub async fn run(mut self) -> Result<()> {
        let mut signals = SignalManager::new().context("Failed to install signal handlers")?;

        self.rpc
            .start(&self.config.rpc.address)
            .await
            .context("Failed to start RPC server")?;

        let workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(Arc::clone(&self.monitor).run(self.shutdown.child_token())),
            tokio::spawn(Arc::clone(&self.dhparams).run(self.shutdown.child_token())),
            tokio::spawn(probe_nodes(
                self.rpc.registry().clone(),
                Duration::from_secs(self.config.rpc.health_probe_interval_secs),
                self.shutdown.child_token(),
            )),
        ];

        self.ensure_site_certificates().await;

        loop {
            match signals.recv().await {
                SignalType::Reload => {
                    if let Err(e) = self.reload().await {
                        let message = format!("{:#}", e);
                        error!(error = %message, "Configuration reload failed, keeping current configuration");
                    }
                }
                SignalType::Shutdown => break,
            }
        }

        info!("Shutting down");
        self.shutdown.cancel();
        self.rpc.stop().await;
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task failed");
            }
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Queue certificate resolution for every site.
    async fn ensure_site_certificates(&self) {
        let Ok(state) = self.state.snapshot() else {
            return;
        };
        for site in &state.sites {
            let spec = JobSpec::TlsCertificate {
                domain: site.domain.clone(),
            };
            if let Err(e) = self.jobs.add_job(spec).await {
                info!(domain = %site.domain, reason = %e, "Certificate job not started");
            }
        }
    }

    async fn reload(&mut self) -> Result<()> {
        let Some(path) = self.config_path.clone() else {
            info!("No configuration file to reload");
            return Ok(());
        };

        info!(path = %path.display(), "Reloading configuration");
        let config = Config::from_file(&path)?;
        let result = config.validate().context("Configuration validation failed")?;
        for warning in &result.warnings {
            warn!("{}", warning.message);
        }

        if config.rpc.address != self.config.rpc.address {
            info!(
                old = %self.config.rpc.address,
                new = %config.rpc.address,
                "RPC address changed, restarting server"
            );
            self.rpc
                .restart(&config.rpc.address)
                .await
                .context("Failed to restart RPC server")?;
        }

        if config.rpc.health_probe_interval_secs != self.config.rpc.health_probe_interval_secs
            || config.rpc.graceful_shutdown_timeout_secs != self.config.rpc.graceful_shutdown_timeout_secs
            || config.state != self.config.state
            || config.certificates != self.config.certificates
            || config.dhparams != self.config.dhparams
            || config.notifications != self.config.notifications
            || config.custodial_store != self.config.custodial_store
        {
            warn!("Only the RPC address is applied on reload; restart to apply the other changes");
        }

        self.config = config;
        self.monitor.trigger();
        info!("Configuration reloaded");
        Ok(())
    }
}

impl std::fmt::Debug for SitefleetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitefleetController")
            .field("config_path", &self.config_path)
            .field("rpc", &self.rpc)
            .finish()
    }
}
