//! Diffie-Hellman parameter regeneration.
//!
//! Parameters are shared by every node. The leader regenerates them once
//! they are older than the configured maximum age; until the first
//! generation completes nodes are served the RFC 7919 default group.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sitefleet_config::DhParamsConfig;

use crate::state::{is_valid_dh_pem, StateError, StateManager};

/// DH parameter generation errors
#[derive(Debug, Error)]
pub enum DhParamsError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("generator produced malformed DH parameters")]
    Invalid,

    #[error(transparent)]
    State(#[from] StateError),
}

/// Produces PEM-encoded DH parameters
#[async_trait]
pub trait DhParamsGenerator: Send + Sync {
    async fn generate(&self, bits: u32) -> Result<String, DhParamsError>;
}

/// Generates parameters with `openssl dhparam`
#[derive(Debug, Clone)]
pub struct OpensslDhParams {
    program: String,
}

impl OpensslDhParams {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for OpensslDhParams {
    fn default() -> Self {
        Self::new("openssl")
    }
}

#[async_trait]
impl DhParamsGenerator for OpensslDhParams {
    async fn generate(&self, bits: u32) -> Result<String, DhParamsError> {
        let output = Command::new(&self.program)
            .arg("dhparam")
            .arg(bits.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DhParamsError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DhParamsError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Leader-gated periodic regeneration
pub struct DhParamsWorker {
    state: Arc<StateManager>,
    generator: Arc<dyn DhParamsGenerator>,
    bits: u32,
    max_age: chrono::Duration,
    check_interval: Duration,
    refresh: Notify,
}

impl DhParamsWorker {
    pub fn new(state: Arc<StateManager>, generator: Arc<dyn DhParamsGenerator>, config: &DhParamsConfig) -> Self {
        Self {
            state,
            generator,
            bits: config.bits,
            max_age: chrono::Duration::days(i64::from(config.max_age_days)),
            check_interval: Duration::from_secs(config.check_interval_secs),
            refresh: Notify::new(),
        }
    }

    /// Request an immediate check.
    pub fn trigger(&self) {
        self.refresh.notify_one();
    }

    /// Whether the current parameters are defaults or older than the maximum age.
    pub fn needs_regeneration(&self, now: DateTime<Utc>) -> bool {
        match self.state.get_dh_params().date {
            None => true,
            Some(date) => now - date >= self.max_age,
        }
    }

    /// Regenerate if needed; returns whether new parameters were stored.
    pub async fn check_and_regenerate(&self, now: DateTime<Utc>) -> Result<bool, DhParamsError> {
        if !self.needs_regeneration(now) {
            debug!("DH parameters are current");
            return Ok(false);
        }
        self.regenerate().await?;
        Ok(true)
    }

    /// Generate and store new parameters unconditionally.
    pub async fn regenerate(&self) -> Result<(), DhParamsError> {
        info!(bits = self.bits, "Generating DH parameters");
        let start = Instant::now();

        let pem = self.generator.generate(self.bits).await?;
        if !is_valid_dh_pem(&pem) {
            return Err(DhParamsError::Invalid);
        }
        self.state.set_dh_params(pem, Utc::now()).await?;

        info!(
            bits = self.bits,
            elapsed_secs = start.elapsed().as_secs(),
            "DH parameters regenerated"
        );
        Ok(())
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            max_age_days = self.max_age.num_days(),
            "Starting DH parameter worker"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => {}
                _ = shutdown.cancelled() => {
                    info!("DH parameter worker stopped");
                    return;
                }
            }

            if !self.state.is_leader().await {
                debug!("Not the leader, skipping DH parameter check");
                continue;
            }

            let result = tokio::select! {
                result = self.check_and_regenerate(Utc::now()) => result,
                _ = shutdown.cancelled() => {
                    info!("DH parameter worker stopped during generation");
                    return;
                }
            };
            if let Err(e) = result {
                error!(error = %e, "DH parameter regeneration failed");
            }
        }
    }
}

impl std::fmt::Debug for DhParamsWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhParamsWorker")
            .field("bits", &self.bits)
            .field("max_age_days", &self.max_age.num_days())
            .finish()
    }
}
