//! Background job coordination.
//!
//! Jobs are identified by a hash of their content, so a request for work
//! that is already in flight attaches to the running job instead of
//! starting it again. Any number of callers can wait for a job; all of them
//! are woken when it finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sitefleet_common::JobId;

use crate::certs::CertificateEngine;
use crate::dhparams::DhParamsWorker;
use crate::state::StateManager;

/// How long a failure stays visible to late waiters
const DEFAULT_FAILURE_RETENTION: Duration = Duration::from_secs(300);

/// A unit of background work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobSpec {
    /// Resolve, and generate if needed, the certificate for a site
    TlsCertificate { domain: String },
    /// Regenerate the shared DH parameters now
    DhParams,
}

impl JobSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            JobSpec::TlsCertificate { .. } => "tls-certificate",
            JobSpec::DhParams => "dh-params",
        }
    }

    fn payload(&self) -> String {
        match self {
            JobSpec::TlsCertificate { domain } => domain.to_ascii_lowercase(),
            JobSpec::DhParams => String::new(),
        }
    }

    /// Deterministic ID: hex SHA-256 of the kind and payload.
    pub fn id(&self) -> JobId {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.payload().as_bytes());
        JobId::new(hex::encode(hasher.finalize()))
    }
}

/// Job coordination errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("not the cluster leader")]
    NotLeader,

    #[error("job {id} failed: {message}")]
    Failed { id: JobId, message: String },

    #[error("job {0} ended without reporting a result")]
    Abandoned(JobId),
}

/// Executes job specs
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, spec: &JobSpec) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

enum JobEntry {
    Running(watch::Sender<JobStatus>),
    Failed { message: String, at: Instant },
}

/// Deduplicating, leader-gated job registry
#[derive(Clone)]
pub struct JobCoordinator {
    state: Arc<StateManager>,
    runner: Arc<dyn JobRunner>,
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    failure_retention: Duration,
}

impl JobCoordinator {
    pub fn new(state: Arc<StateManager>, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            state,
            runner,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            failure_retention: DEFAULT_FAILURE_RETENTION,
        }
    }

    pub fn with_failure_retention(mut self, retention: Duration) -> Self {
        self.failure_retention = retention;
        self
    }

    pub async fn is_leader(&self) -> bool {
        self.state.is_leader().await
    }

    /// Start `spec` unless an identical job is already running.
    pub async fn add_job(&self, spec: JobSpec) -> Result<JobId, JobError> {
        if !self.is_leader().await {
            return Err(JobError::NotLeader);
        }

        let id = spec.id();
        {
            let mut jobs = self.jobs.lock();
            self.prune_failures(&mut jobs);
            if let Some(JobEntry::Running(_)) = jobs.get(&id) {
                debug!(job_id = %id, kind = spec.kind(), "Job already running");
                return Ok(id);
            }
            let (tx, _) = watch::channel(JobStatus::Running);
            jobs.insert(id.clone(), JobEntry::Running(tx));
        }

        info!(job_id = %id, kind = spec.kind(), "Starting job");

        let coordinator = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            // The run gets its own task so a panic surfaces as a JoinError here
            let runner = Arc::clone(&coordinator.runner);
            let run_spec = spec.clone();
            let outcome = tokio::spawn(async move { runner.run(&run_spec).await }).await;
            match outcome {
                Ok(Ok(())) => {
                    info!(job_id = %job_id, kind = spec.kind(), "Job completed");
                    coordinator.complete_job(&job_id);
                }
                Ok(Err(e)) => {
                    warn!(job_id = %job_id, kind = spec.kind(), error = %e, "Job failed");
                    coordinator.fail_job(&job_id, format!("{:#}", e));
                }
                Err(e) => {
                    error!(job_id = %job_id, kind = spec.kind(), error = %e, "Job task aborted");
                    coordinator.fail_job(&job_id, format!("job task aborted: {}", e));
                }
            }
        });

        Ok(id)
    }

    /// Wake all waiters with success and forget the job. Idempotent.
    pub fn complete_job(&self, id: &JobId) {
        if let Some(JobEntry::Running(tx)) = self.jobs.lock().remove(id) {
            tx.send_replace(JobStatus::Succeeded);
        }
    }

    fn fail_job(&self, id: &JobId, message: String) {
        let previous = self.jobs.lock().insert(
            id.clone(),
            JobEntry::Failed {
                message: message.clone(),
                at: Instant::now(),
            },
        );
        if let Some(JobEntry::Running(tx)) = previous {
            tx.send_replace(JobStatus::Failed(message));
        }
    }

    fn prune_failures(&self, jobs: &mut HashMap<JobId, JobEntry>) {
        let retention = self.failure_retention;
        jobs.retain(|_, entry| match entry {
            JobEntry::Failed { at, .. } => at.elapsed() < retention,
            JobEntry::Running(_) => true,
        });
    }

    /// Wait for `id` to finish; unknown or finished jobs resolve at once.
    pub async fn wait_for_job(&self, id: &JobId) -> Result<(), JobError> {
        let mut rx = {
            let mut jobs = self.jobs.lock();
            self.prune_failures(&mut jobs);
            match jobs.get(id) {
                None => return Ok(()),
                Some(JobEntry::Failed { message, .. }) => {
                    return Err(JobError::Failed {
                        id: id.clone(),
                        message: message.clone(),
                    })
                }
                Some(JobEntry::Running(tx)) => tx.subscribe(),
            }
        };

        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                JobStatus::Succeeded => return Ok(()),
                JobStatus::Failed(message) => {
                    return Err(JobError::Failed {
                        id: id.clone(),
                        message,
                    })
                }
                JobStatus::Running => {}
            }

            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                return match last {
                    JobStatus::Succeeded => Ok(()),
                    JobStatus::Failed(message) => Err(JobError::Failed {
                        id: id.clone(),
                        message,
                    }),
                    JobStatus::Running => Err(JobError::Abandoned(id.clone())),
                };
            }
        }
    }

    /// Number of jobs currently in flight
    pub fn running_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|entry| matches!(entry, JobEntry::Running(_)))
            .count()
    }
}

impl std::fmt::Debug for JobCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("running", &self.running_count())
            .field("failure_retention", &self.failure_retention)
            .finish()
    }
}

/// Runs jobs against the controller's certificate engine and DH worker
pub struct ControllerJobRunner {
    engine: Arc<CertificateEngine>,
    dhparams: Arc<DhParamsWorker>,
}

impl ControllerJobRunner {
    pub fn new(engine: Arc<CertificateEngine>, dhparams: Arc<DhParamsWorker>) -> Self {
        Self { engine, dhparams }
    }
}

#[async_trait]
impl JobRunner for ControllerJobRunner {
    async fn run(&self, spec: &JobSpec) -> anyhow::Result<()> {
        match spec {
            JobSpec::TlsCertificate { domain } => {
                self.engine.get_tls_certificate(domain).await?;
            }
            JobSpec::DhParams => {
                self.dhparams.regenerate().await?;
            }
        }
        Ok(())
    }
}
