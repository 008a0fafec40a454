//! Node health reporting.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use sitefleet_common::NodeId;

use crate::proto;

/// Health reported by a node in answer to a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_name: String,
    pub sequence: u64,
    /// Per-site probe error; `None` means healthy
    pub sites: BTreeMap<String, Option<String>>,
    pub reported_at: DateTime<Utc>,
}

impl NodeHealth {
    pub fn healthy(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            sequence: 0,
            sites: BTreeMap::new(),
            reported_at: Utc::now(),
        }
    }

    pub fn with_site(mut self, domain: impl Into<String>, error: Option<String>) -> Self {
        self.sites.insert(domain.into(), error);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.sites.values().all(Option::is_none)
    }

    pub fn into_report(self) -> proto::HealthReport {
        proto::HealthReport {
            node_name: self.node_name,
            sequence: self.sequence,
            sites: self
                .sites
                .into_iter()
                .map(|(domain, error)| proto::SiteHealth { domain, error })
                .collect(),
            timestamp_ms: self.reported_at.timestamp_millis(),
        }
    }
}

impl From<proto::HealthReport> for NodeHealth {
    fn from(report: proto::HealthReport) -> Self {
        Self {
            node_name: report.node_name,
            sequence: report.sequence,
            sites: report
                .sites
                .into_iter()
                .map(|s| (s.domain, s.error))
                .collect(),
            reported_at: Utc
                .timestamp_millis_opt(report.timestamp_ms)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// A node attached through the health channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub connected_at: DateTime<Utc>,
    pub last_health: Option<NodeHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_builders() {
        let healthy = NodeHealth::healthy("node-1").with_site("a.example", None);
        assert!(healthy.is_healthy());

        let unhealthy = healthy.with_site("b.example", Some("connection refused".into()));
        assert!(!unhealthy.is_healthy());
    }

    #[test]
    fn test_report_conversion() {
        let health = NodeHealth::healthy("node-1").with_site("a.example", Some("502".into()));
        let report = health.clone().into_report();
        assert_eq!(report.sites.len(), 1);

        let back = NodeHealth::from(report);
        assert_eq!(back.node_name, "node-1");
        assert_eq!(back.sites, health.sites);
    }
}
