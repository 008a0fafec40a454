//! Authoritative node state model.
//!
//! [`NodeState`] is the snapshot the controller persists and pushes to every
//! worker node. It is only ever replaced as a whole: writers read a copy,
//! edit it, and hand the full value back to the state manager.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::CertificateId;

/// Where a site's TLS certificate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateType {
    /// Generated and signed by the controller itself
    #[default]
    SelfSigned,
    /// Custodial certificate fetched from an external secret store
    Imported,
    /// Issued by an ACME certificate authority
    Acme,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::SelfSigned => "self-signed",
            CertificateType::Imported => "imported",
            CertificateType::Acme => "acme",
        }
    }

    /// Whether the controller owns (and therefore renews) certificates of this type.
    pub fn is_generated(&self) -> bool {
        !matches!(self, CertificateType::Imported)
    }

    /// Parse a loosely formatted type name.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "self-signed" | "selfsigned" => Some(CertificateType::SelfSigned),
            "imported" | "custodial" | "akv" => Some(CertificateType::Imported),
            "acme" | "letsencrypt" => Some(CertificateType::Acme),
            _ => None,
        }
    }
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS settings for a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTls {
    #[serde(rename = "type", default)]
    pub cert_type: CertificateType,
    /// Custodial certificate name (imported certificates only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_name: Option<String>,
    /// Pinned custodial version; latest when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_version: Option<String>,
}

/// Reference to the app deployed on a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<serde_json::Value>,
}

/// One hosted domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteState {
    pub domain: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tls: SiteTls,
    /// Registry entry of the controller-generated certificate (self-signed or ACME)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_tls_id: Option<CertificateId>,
    /// Registry entry of the imported certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_tls_id: Option<CertificateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppRef>,
}

impl SiteState {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            aliases: Vec::new(),
            tls: SiteTls::default(),
            generated_tls_id: None,
            imported_tls_id: None,
            app: None,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tls(mut self, tls: SiteTls) -> Self {
        self.tls = tls;
        self
    }

    /// Sorted, de-duplicated set of the primary domain and all aliases.
    pub fn all_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = std::iter::once(&self.domain)
            .chain(self.aliases.iter())
            .map(|d| d.to_ascii_lowercase())
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }

    /// Whether `name` is this site's primary domain or one of its aliases.
    pub fn matches(&self, name: &str) -> bool {
        self.domain.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// The certificate ID the site currently serves, based on its TLS type.
    pub fn active_certificate_id(&self) -> Option<&CertificateId> {
        match self.tls.cert_type {
            CertificateType::Imported => self.imported_tls_id.as_ref(),
            _ => self.generated_tls_id.as_ref(),
        }
    }
}

/// Shared Diffie-Hellman parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhParams {
    pub pem: String,
    /// When the parameters were generated; `None` for built-in defaults
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// A certificate registry entry.
///
/// Derived properties are cached at creation time so readers never need to
/// re-parse the PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(rename = "type")]
    pub cert_type: CertificateType,
    pub key_pem: String,
    pub cert_pem: String,
    /// Custodial name (imported certificates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Custodial version (imported certificates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    /// A bare record with only the type and PEM material set.
    pub fn from_pem(
        cert_type: CertificateType,
        key_pem: impl Into<String>,
        cert_pem: impl Into<String>,
    ) -> Self {
        Self {
            cert_type,
            key_pem: key_pem.into(),
            cert_pem: cert_pem.into(),
            name: None,
            version: None,
            subject: None,
            issuer: None,
            domains: Vec::new(),
            not_before: None,
            not_after: None,
        }
    }
}

/// Snapshot invariant violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateValidationError {
    #[error("site has an empty domain")]
    EmptyDomain,

    #[error("domain '{domain}' is used by more than one site")]
    DuplicateDomain { domain: String },

    #[error("site '{domain}' references unknown certificate '{id}'")]
    DanglingCertificate { domain: String, id: String },
}

/// The full desired state distributed to every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub sites: Vec<SiteState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dh_params: Option<DhParams>,
    #[serde(default)]
    pub certificates: BTreeMap<CertificateId, CertificateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codesign_key: Option<String>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a site by primary domain or alias.
    pub fn site(&self, domain: &str) -> Option<&SiteState> {
        self.sites.iter().find(|s| s.matches(domain))
    }

    pub fn site_mut(&mut self, domain: &str) -> Option<&mut SiteState> {
        self.sites.iter_mut().find(|s| s.matches(domain))
    }

    /// Whether any site points at `id`.
    pub fn is_referenced(&self, id: &CertificateId) -> bool {
        self.sites.iter().any(|s| {
            s.generated_tls_id.as_ref() == Some(id) || s.imported_tls_id.as_ref() == Some(id)
        })
    }

    /// Check the snapshot invariants.
    ///
    /// Domains and aliases must be unique across all sites, and every
    /// certificate ID a site holds must exist in the registry.
    pub fn validate(&self) -> Result<(), StateValidationError> {
        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.domain.trim().is_empty() {
                return Err(StateValidationError::EmptyDomain);
            }
            // Repeats within one site fold together, as in all_domains
            for name in site.all_domains() {
                if !seen.insert(name.clone()) {
                    return Err(StateValidationError::DuplicateDomain { domain: name });
                }
            }
            for id in [&site.generated_tls_id, &site.imported_tls_id]
                .into_iter()
                .flatten()
            {
                if !self.certificates.contains_key(id) {
                    return Err(StateValidationError::DanglingCertificate {
                        domain: site.domain.clone(),
                        id: id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_domains_sorted_and_deduplicated() {
        let site = SiteState::new("b.example").with_aliases(["a.example", "B.example"]);
        assert_eq!(site.all_domains(), vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_site_lookup_by_alias() {
        let mut state = NodeState::new();
        state
            .sites
            .push(SiteState::new("a.example").with_aliases(["www.a.example"]));

        assert!(state.site("www.a.example").is_some());
        assert!(state.site("WWW.A.EXAMPLE").is_some());
        assert!(state.site("b.example").is_none());
    }

    #[test]
    fn test_validate_duplicate_alias() {
        let mut state = NodeState::new();
        state.sites.push(SiteState::new("a.example"));
        state
            .sites
            .push(SiteState::new("b.example").with_aliases(["a.example"]));

        assert_eq!(
            state.validate(),
            Err(StateValidationError::DuplicateDomain {
                domain: "a.example".to_string()
            })
        );
    }

    #[test]
    fn test_validate_folds_case_variants_within_a_site() {
        let mut state = NodeState::new();
        state.sites.push(
            SiteState::new("a.example").with_aliases(["A.example", "www.a.example", "WWW.a.example"]),
        );
        assert!(state.validate().is_ok());

        // The same name on another site is still a conflict, whatever its case
        state.sites.push(SiteState::new("WWW.A.EXAMPLE"));
        assert_eq!(
            state.validate(),
            Err(StateValidationError::DuplicateDomain {
                domain: "www.a.example".to_string()
            })
        );
    }

    #[test]
    fn test_validate_dangling_certificate() {
        let mut state = NodeState::new();
        let mut site = SiteState::new("a.example");
        site.generated_tls_id = Some(CertificateId::from("missing"));
        state.sites.push(site);

        assert!(matches!(
            state.validate(),
            Err(StateValidationError::DanglingCertificate { .. })
        ));

        state.certificates.insert(
            CertificateId::from("missing"),
            CertificateRecord::from_pem(CertificateType::SelfSigned, "k", "c"),
        );
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_active_certificate_follows_type() {
        let mut site = SiteState::new("a.example");
        site.generated_tls_id = Some(CertificateId::from("gen"));
        site.imported_tls_id = Some(CertificateId::from("imp"));

        assert_eq!(site.active_certificate_id().unwrap().as_str(), "gen");
        site.tls.cert_type = CertificateType::Imported;
        assert_eq!(site.active_certificate_id().unwrap().as_str(), "imp");
    }

    #[test]
    fn test_state_json_roundtrip_with_defaults() {
        let state: NodeState = serde_json::from_str("{}").unwrap();
        assert!(state.sites.is_empty());
        assert!(state.dh_params.is_none());

        let json = r#"{"sites":[{"domain":"a.example","tls":{"type":"acme"}}]}"#;
        let state: NodeState = serde_json::from_str(json).unwrap();
        assert_eq!(state.sites[0].tls.cert_type, CertificateType::Acme);
    }

    #[test]
    fn test_certificate_type_parsing() {
        assert_eq!(
            CertificateType::from_str_loose("self_signed"),
            Some(CertificateType::SelfSigned)
        );
        assert_eq!(
            CertificateType::from_str_loose("ACME"),
            Some(CertificateType::Acme)
        );
        assert_eq!(CertificateType::from_str_loose("bogus"), None);
    }

    proptest! {
        #[test]
        fn test_all_domains_normalized(
            domain in "[a-zA-Z]{1,6}\\.example",
            aliases in prop::collection::vec("[a-zA-Z]{1,6}\\.example", 0..5),
        ) {
            let site = SiteState::new(domain.clone()).with_aliases(aliases.clone());
            let domains = site.all_domains();

            prop_assert!(domains.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(domains.iter().all(|d| *d == d.to_ascii_lowercase()));
            for name in std::iter::once(&domain).chain(aliases.iter()) {
                prop_assert!(site.matches(name));
                prop_assert!(domains.contains(&name.to_ascii_lowercase()));
            }
        }
    }
}
