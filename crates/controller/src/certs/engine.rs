//! Certificate source resolution and replacement.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use sitefleet_common::{CertificateId, CertificateRecord, CertificateType, SiteState};
use sitefleet_config::CertificatesConfig;

use super::custodial::CustodialStore;
use super::inspect::{describe_certificate, inspect_certificate};
use super::selfsigned::generate_self_signed;
use super::CertError;
use crate::state::{StateError, StateManager};

/// Backdating applied to generated certificates to absorb clock skew
const NOT_BEFORE_SKEW_MINUTES: i64 = 5;

/// PEM material returned by an issuer
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub key_pem: String,
    pub cert_pem: String,
}

/// A certificate authority the controller can order certificates from.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn issue(&self, domains: &[String]) -> Result<IssuedCertificate, CertError>;
}

/// Validity and renewal windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificatePolicy {
    pub self_signed_validity: Duration,
    pub self_signed_min_validity: Duration,
    pub acme_min_validity: Duration,
}

impl CertificatePolicy {
    /// Remaining validity below which a generated certificate is renewed.
    ///
    /// `None` for imported certificates, which are never renewed here.
    pub fn min_validity(&self, cert_type: CertificateType) -> Option<Duration> {
        match cert_type {
            CertificateType::SelfSigned => Some(self.self_signed_min_validity),
            CertificateType::Acme => Some(self.acme_min_validity),
            CertificateType::Imported => None,
        }
    }
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self::from(&CertificatesConfig::default())
    }
}

impl From<&CertificatesConfig> for CertificatePolicy {
    fn from(config: &CertificatesConfig) -> Self {
        Self {
            self_signed_validity: Duration::days(i64::from(config.self_signed_validity_days)),
            self_signed_min_validity: Duration::days(i64::from(
                config.self_signed_min_validity_days,
            )),
            acme_min_validity: Duration::days(i64::from(config.acme_min_validity_days)),
        }
    }
}

/// Produces, validates and replaces site certificates
pub struct CertificateEngine {
    state: Arc<StateManager>,
    policy: CertificatePolicy,
    custodial: Option<Arc<dyn CustodialStore>>,
    issuer: Option<Arc<dyn CertificateIssuer>>,
}

impl CertificateEngine {
    pub fn new(state: Arc<StateManager>, policy: CertificatePolicy) -> Self {
        Self {
            state,
            policy,
            custodial: None,
            issuer: None,
        }
    }

    pub fn with_custodial_store(mut self, store: Arc<dyn CustodialStore>) -> Self {
        self.custodial = Some(store);
        self
    }

    pub fn with_issuer(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn policy(&self) -> &CertificatePolicy {
        &self.policy
    }

    /// Obtain a fresh certificate for `site` from the given source.
    pub async fn request_certificate(
        &self,
        site: &SiteState,
        cert_type: CertificateType,
    ) -> Result<CertificateRecord, CertError> {
        let domains = site.all_domains();
        match cert_type {
            CertificateType::SelfSigned => {
                let now = Utc::now();
                generate_self_signed(
                    &domains,
                    now - Duration::minutes(NOT_BEFORE_SKEW_MINUTES),
                    now + self.policy.self_signed_validity,
                )
            }
            CertificateType::Acme => {
                let issuer = self
                    .issuer
                    .as_ref()
                    .ok_or(CertError::SourceUnavailable(CertificateType::Acme))?;
                let issued = issuer.issue(&domains).await?;
                describe_certificate(CertificateType::Acme, &issued.key_pem, &issued.cert_pem)
            }
            CertificateType::Imported => {
                let store = self
                    .custodial
                    .as_ref()
                    .ok_or(CertError::SourceUnavailable(CertificateType::Imported))?;
                let name = site.tls.imported_name.as_deref().unwrap_or(&site.domain);
                let fetched = store
                    .get_certificate(name, site.tls.imported_version.as_deref())
                    .await?;

                let mut record = describe_certificate(
                    CertificateType::Imported,
                    &fetched.key_pem,
                    &fetched.cert_pem,
                )?;
                record.name = Some(fetched.name);
                record.version = Some(fetched.version);
                Ok(record)
            }
        }
    }

    /// Key and certificate PEM for the site serving `domain`.
    ///
    /// When the referenced certificate is missing or no longer acceptable a
    /// new one is obtained and installed first. ACME sites fall back to a
    /// self-signed certificate while issuance is unavailable.
    pub async fn get_tls_certificate(&self, domain: &str) -> Result<(String, String), CertError> {
        let site = self
            .state
            .get_site(domain)
            .ok_or_else(|| CertError::SiteNotFound(domain.to_string()))?;
        let cert_type = site.tls.cert_type;
        let imported = cert_type == CertificateType::Imported;

        if let Some(id) = site.active_certificate_id() {
            match self.state.get_certificate_record(id) {
                Ok(record) => match inspect_certificate(&record.cert_pem, &site, imported, Utc::now()) {
                    Ok(_) => return Ok((record.key_pem, record.cert_pem)),
                    Err(e) => {
                        debug!(domain = %site.domain, certificate_id = %id, error = %e, "Stored certificate unusable");
                    }
                },
                Err(StateError::CertificateNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let record = match self.request_certificate(&site, cert_type).await {
            Ok(record) => record,
            Err(e) if cert_type == CertificateType::Acme => {
                warn!(
                    domain = %site.domain,
                    error = %e,
                    "ACME issuance failed, serving a self-signed certificate"
                );
                self.request_certificate(&site, CertificateType::SelfSigned)
                    .await?
            }
            Err(e) => return Err(e),
        };

        let id = self.install(&site, record).await?;
        let record = self.state.get_certificate_record(&id)?;
        Ok((record.key_pem, record.cert_pem))
    }

    /// Replace the site's generated certificate with a freshly requested one.
    pub async fn renew(&self, site: &SiteState) -> Result<CertificateId, CertError> {
        let record = self.request_certificate(site, site.tls.cert_type).await?;
        self.install(site, record).await
    }

    /// Store `record` and point `site` at it; returns the ID the site serves.
    ///
    /// Storing the new entry, repointing every site that used the old one
    /// and dropping the old entry happen in one state update, so no reader
    /// sees a dangling reference. If another install replaced the site's
    /// certificate since `site` was read, nothing is written and the
    /// winner's ID is returned.
    pub async fn install(
        &self,
        site: &SiteState,
        record: CertificateRecord,
    ) -> Result<CertificateId, CertError> {
        let imported = record.cert_type == CertificateType::Imported;
        let not_after = record.not_after;
        let expected = if imported {
            site.imported_tls_id.clone()
        } else {
            site.generated_tls_id.clone()
        };
        let domain = site.domain.clone();
        let new_id = CertificateId::new();

        let serving = self
            .state
            .update(|state| {
                let current = state
                    .site(&domain)
                    .ok_or_else(|| StateError::SiteNotFound(domain.clone()))?;
                let current = if imported {
                    current.imported_tls_id.clone()
                } else {
                    current.generated_tls_id.clone()
                };
                if current != expected {
                    return Ok(current);
                }

                state.certificates.insert(new_id.clone(), record);
                match &expected {
                    Some(old_id) => {
                        for site in &mut state.sites {
                            for slot in [&mut site.generated_tls_id, &mut site.imported_tls_id] {
                                if slot.as_ref() == Some(old_id) {
                                    *slot = Some(new_id.clone());
                                }
                            }
                        }
                        state.certificates.remove(old_id);
                    }
                    None => {
                        let site = state
                            .site_mut(&domain)
                            .ok_or_else(|| StateError::SiteNotFound(domain.clone()))?;
                        if imported {
                            site.imported_tls_id = Some(new_id.clone());
                        } else {
                            site.generated_tls_id = Some(new_id.clone());
                        }
                    }
                }
                Ok(Some(new_id.clone()))
            })
            .await?;

        match serving {
            Some(id) if id == new_id => {
                info!(
                    domain = %domain,
                    certificate_id = %new_id,
                    not_after = ?not_after,
                    "Installed certificate"
                );
                Ok(id)
            }
            Some(id) => {
                debug!(domain = %domain, certificate_id = %id, "Certificate already replaced concurrently");
                Ok(id)
            }
            None => Err(CertError::Superseded(domain)),
        }
    }
}

impl std::fmt::Debug for CertificateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateEngine")
            .field("policy", &self.policy)
            .field("has_custodial_store", &self.custodial.is_some())
            .field("has_issuer", &self.issuer.is_some())
            .finish()
    }
}
