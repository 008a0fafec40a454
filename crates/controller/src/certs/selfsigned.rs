//! Self-signed certificate generation

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DnType, KeyPair};
use time::OffsetDateTime;
use tracing::debug;

use sitefleet_common::{CertificateRecord, CertificateType};

use super::inspect::describe_certificate;
use super::CertError;

/// Generate a self-signed certificate covering `domains`.
///
/// The first domain becomes the subject common name.
pub fn generate_self_signed(
    domains: &[String],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateRecord, CertError> {
    let Some(common_name) = domains.first() else {
        return Err(CertError::Generation("no domains to certify".to_string()));
    };

    let mut params = CertificateParams::new(domains.to_vec())?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name.clone());
    params.not_before = to_offset(not_before)?;
    params.not_after = to_offset(not_after)?;

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;

    debug!(
        common_name = %common_name,
        san_count = domains.len(),
        not_after = %not_after,
        "Generated self-signed certificate"
    );

    describe_certificate(CertificateType::SelfSigned, &key.serialize_pem(), &cert.pem())
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime, CertError> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CertError::Generation(format!("invalid validity bound: {}", e)))
}
