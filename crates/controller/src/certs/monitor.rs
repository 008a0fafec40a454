//! Periodic certificate monitor.
//!
//! Generated certificates (self-signed and ACME) are renewed once their
//! remaining validity drops inside the source's renewal window. Imported
//! certificates are never renewed here; instead operators are notified as
//! expiry approaches, at most once per threshold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sitefleet_common::{CertificateType, NodeState, SiteState};
use sitefleet_config::DEFAULT_NOTIFICATION_DAYS;

use super::engine::CertificateEngine;
use super::inspect::parse_certificate;
use super::CertError;
use crate::notifications::{Notification, Notifier, Severity};
use crate::state::StateManager;

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of one monitor pass
#[derive(Debug, Default)]
pub struct MonitorReport {
    /// Domains whose certificate was replaced
    pub renewed: Vec<String>,
    /// Domains notified, with the threshold (days) that fired
    pub notified: Vec<(String, i64)>,
    /// Per-domain renewal failures
    pub errors: Vec<(String, CertError)>,
}

/// Certificate renewal and expiry notification loop
pub struct CertificateMonitor {
    state: Arc<StateManager>,
    engine: Arc<CertificateEngine>,
    notifier: Arc<Notifier>,
    /// Day offsets relative to expiry, least urgent first
    thresholds: Vec<i64>,
    /// Highest threshold index already notified, per domain
    notified: Mutex<HashMap<String, usize>>,
    check_interval: Duration,
    refresh: Notify,
}

impl CertificateMonitor {
    pub fn new(state: Arc<StateManager>, engine: Arc<CertificateEngine>, notifier: Arc<Notifier>) -> Self {
        Self {
            state,
            engine,
            notifier,
            thresholds: DEFAULT_NOTIFICATION_DAYS.to_vec(),
            notified: Mutex::new(HashMap::new()),
            check_interval: Duration::from_secs(12 * 3600),
            refresh: Notify::new(),
        }
    }

    /// Set the notification offsets; they are sorted least urgent first.
    pub fn with_thresholds(mut self, mut thresholds: Vec<i64>) -> Self {
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();
        self.thresholds = thresholds;
        self
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Request an immediate check.
    pub fn trigger(&self) {
        self.refresh.notify_one();
    }

    /// Run until `shutdown` is cancelled. Only the leader checks.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Starting certificate monitor"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => {
                    debug!("Certificate check requested");
                }
                _ = shutdown.cancelled() => {
                    info!("Certificate monitor stopped");
                    return;
                }
            }

            if !self.state.is_leader().await {
                debug!("Not the leader, skipping certificate check");
                continue;
            }

            match self.check_all_at(Utc::now()).await {
                Ok(report) => {
                    for (domain, e) in &report.errors {
                        error!(domain = %domain, error = %e, "Certificate renewal failed");
                    }
                    info!(
                        renewed = report.renewed.len(),
                        notified = report.notified.len(),
                        errors = report.errors.len(),
                        "Certificate check complete"
                    );
                }
                Err(e) => error!(error = %e, "Certificate check failed"),
            }
        }
    }

    /// Check every site as of `now`.
    ///
    /// A failure on one site is collected and the remaining sites are still
    /// checked.
    pub async fn check_all_at(&self, now: DateTime<Utc>) -> Result<MonitorReport, CertError> {
        let state = self.state.snapshot()?;
        let mut report = MonitorReport::default();

        debug!(sites = state.sites.len(), "Checking certificates");

        for site in &state.sites {
            match site.tls.cert_type {
                CertificateType::Imported => {
                    if let Some(days) = self.check_imported(site, &state, now) {
                        let notification = expiry_notification(site, days, now);
                        self.notifier.notify(&notification).await;
                        report.notified.push((site.domain.clone(), days));
                    }
                }
                _ => {
                    let Some(reason) = self.renewal_reason(site, &state, now) else {
                        continue;
                    };
                    info!(domain = %site.domain, reason, "Renewing certificate");
                    match self.engine.renew(site).await {
                        Ok(id) => {
                            info!(domain = %site.domain, certificate_id = %id, "Certificate renewed");
                            report.renewed.push(site.domain.clone());
                        }
                        Err(e) => report.errors.push((site.domain.clone(), e)),
                    }
                }
            }
        }

        Ok(report)
    }

    fn renewal_reason(&self, site: &SiteState, state: &NodeState, now: DateTime<Utc>) -> Option<&'static str> {
        let Some(record) = site
            .generated_tls_id
            .as_ref()
            .and_then(|id| state.certificates.get(id))
        else {
            return Some("missing");
        };

        // Malformed material counts as missing
        let Ok(info) = parse_certificate(&record.cert_pem) else {
            return Some("malformed");
        };

        if site.tls.cert_type == CertificateType::Acme && record.cert_type == CertificateType::SelfSigned {
            return Some("self-signed placeholder for ACME site");
        }
        if info.domains != site.all_domains() {
            return Some("domains changed");
        }

        let min_validity = self.engine.policy().min_validity(site.tls.cert_type)?;
        if info.remaining(now) < min_validity {
            return Some("expiring");
        }
        None
    }

    /// Returns the newly crossed threshold, if any.
    fn check_imported(&self, site: &SiteState, state: &NodeState, now: DateTime<Utc>) -> Option<i64> {
        let record = site
            .imported_tls_id
            .as_ref()
            .and_then(|id| state.certificates.get(id))?;

        let info = match parse_certificate(&record.cert_pem) {
            Ok(info) => info,
            Err(e) => {
                warn!(domain = %site.domain, error = %e, "Imported certificate is unreadable");
                return None;
            }
        };

        let days_left = info.remaining(now).num_seconds().div_euclid(SECONDS_PER_DAY);
        let crossed = self.thresholds.iter().rposition(|&t| days_left <= t);

        let mut notified = self.notified.lock();
        let Some(index) = crossed else {
            // Replaced with a longer-lived certificate
            notified.remove(&site.domain);
            return None;
        };

        match notified.get(&site.domain) {
            Some(&sent) if sent >= index => None,
            _ => {
                notified.insert(site.domain.clone(), index);
                Some(self.thresholds[index])
            }
        }
    }
}

fn expiry_notification(site: &SiteState, threshold_days: i64, now: DateTime<Utc>) -> Notification {
    let (severity, subject) = match threshold_days {
        d if d < 0 => (Severity::Critical, "Imported certificate expired"),
        d if d <= 3 => (Severity::Warning, "Imported certificate expires soon"),
        _ => (Severity::Info, "Imported certificate expiring"),
    };
    let message = if threshold_days < 0 {
        format!(
            "The certificate for {} expired more than {} day(s) ago; import a new version",
            site.domain, -threshold_days
        )
    } else {
        format!(
            "The certificate for {} expires within {} day(s); import a new version",
            site.domain, threshold_days
        )
    };

    let mut notification = Notification::new(severity, subject, message).for_domain(&site.domain);
    notification.timestamp = now;
    notification
}

impl std::fmt::Debug for CertificateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMonitor")
            .field("thresholds", &self.thresholds)
            .field("check_interval", &self.check_interval)
            .finish()
    }
}
