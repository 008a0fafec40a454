//! Type-safe identifier newtypes for sitefleet.
//!
//! These types keep certificate IDs, node IDs and job IDs from being
//! mixed up (e.g., passing a NodeId where a CertificateId is expected).
//! All of them are plain strings on the wire so they stay portable
//! across the RPC boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an entry in the certificate registry.
///
/// Renewal never mutates an entry in place: it stores the new material
/// under a fresh ID and repoints the owning site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    /// Create a new random certificate ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for CertificateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CertificateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CertificateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Connected worker node identifier.
///
/// Assigned by the controller when a node attaches its health channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Background job identifier.
///
/// Derived from the job's content, so two requests for the same
/// operation carry the same ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_id() {
        let id1 = CertificateId::new();
        let id2 = CertificateId::from_string("test-id");

        assert_ne!(id1, id2);
        assert_eq!(id2.as_str(), "test-id");
        assert!(Uuid::parse_str(id1.as_str()).is_ok());
    }

    #[test]
    fn test_certificate_id_serializes_as_string() {
        let id = CertificateId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_node_id() {
        let id = NodeId::from("node-1");
        assert_eq!(id.as_str(), "node-1");
        assert_eq!(id.to_string(), "node-1");
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn test_job_id() {
        let id = JobId::new("deadbeef");
        assert_eq!(id.as_str(), "deadbeef");
    }
}
