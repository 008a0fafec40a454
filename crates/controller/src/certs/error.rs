//! Certificate lifecycle errors

use chrono::{DateTime, Utc};
use thiserror::Error;

use sitefleet_common::CertificateType;

use crate::state::StateError;

/// Errors from certificate inspection, issuance and storage
#[derive(Debug, Error)]
pub enum CertError {
    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("invalid X.509 certificate: {0}")]
    Parse(String),

    #[error("certificate expires at {not_after}, less than {min_hours}h from now")]
    ExpiresSoon {
        not_after: DateTime<Utc>,
        min_hours: i64,
    },

    #[error("certificate is not valid before {not_before}")]
    NotYetValid { not_before: DateTime<Utc> },

    #[error("certificate names {actual:?} do not match site names {expected:?}")]
    DomainMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("no {0} certificate source configured")]
    SourceUnavailable(CertificateType),

    #[error("custodial certificate '{0}' not found")]
    CustodialNotFound(String),

    #[error("custodial certificate '{name}' version '{version}' is disabled")]
    CustodialDisabled { name: String, version: String },

    #[error("custodial certificate '{name}' version '{version}' is not valid yet")]
    CustodialNotYetValid { name: String, version: String },

    #[error("custodial certificate '{name}' version '{version}' has expired")]
    CustodialExpired { name: String, version: String },

    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("certificate issuer error: {0}")]
    Issuer(String),

    #[error("site '{0}' not found")]
    SiteNotFound(String),

    #[error("certificate of site '{0}' was removed while a replacement was being installed")]
    Superseded(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("custodial store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("custodial metadata error: {0}")]
    Meta(#[from] serde_json::Error),
}

impl From<rcgen::Error> for CertError {
    fn from(e: rcgen::Error) -> Self {
        CertError::Generation(e.to_string())
    }
}

impl CertError {
    /// Whether the certificate was readable but no longer acceptable
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CertError::ExpiresSoon { .. }
                | CertError::NotYetValid { .. }
                | CertError::DomainMismatch { .. }
        )
    }
}
