//! Conversions between the shared state model and wire messages.

use chrono::{DateTime, TimeZone, Utc};

use sitefleet_common::{
    AppRef, CertificateId, CertificateRecord, CertificateType, DhParams, NodeState, SiteState,
    SiteTls,
};

use crate::errors::ProtocolError;
use crate::proto;

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub fn certificate_type_to_proto(t: CertificateType) -> proto::CertificateType {
    match t {
        CertificateType::SelfSigned => proto::CertificateType::SelfSigned,
        CertificateType::Imported => proto::CertificateType::Imported,
        CertificateType::Acme => proto::CertificateType::Acme,
    }
}

pub fn certificate_type_from_proto(t: proto::CertificateType) -> CertificateType {
    match t {
        proto::CertificateType::Imported => CertificateType::Imported,
        proto::CertificateType::Acme => CertificateType::Acme,
        proto::CertificateType::SelfSigned | proto::CertificateType::Unspecified => {
            CertificateType::SelfSigned
        }
    }
}

/// Build the wire snapshot for `state`.
pub fn snapshot_from_state(state: &NodeState, updated_at: Option<DateTime<Utc>>) -> proto::StateSnapshot {
    proto::StateSnapshot {
        sites: state.sites.iter().map(site_to_proto).collect(),
        dh_params: state.dh_params.as_ref().map(|dh| proto::DhParams {
            pem: dh.pem.clone(),
            date_ms: dh.date.map(to_ms),
        }),
        certificates: state
            .certificates
            .iter()
            .map(|(id, record)| certificate_to_proto(id, record))
            .collect(),
        codesign_key: state.codesign_key.clone().unwrap_or_default(),
        updated_at_ms: updated_at.map(to_ms).unwrap_or(0),
    }
}

fn site_to_proto(site: &SiteState) -> proto::Site {
    let (app_name, app_manifest_json) = match &site.app {
        Some(app) => (
            app.name.clone(),
            app.manifest
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };

    proto::Site {
        domain: site.domain.clone(),
        aliases: site.aliases.clone(),
        tls_type: certificate_type_to_proto(site.tls.cert_type) as i32,
        generated_tls_id: site
            .generated_tls_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        imported_tls_id: site
            .imported_tls_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        imported_name: site.tls.imported_name.clone().unwrap_or_default(),
        app_name,
        app_manifest_json,
    }
}

fn certificate_to_proto(id: &CertificateId, record: &CertificateRecord) -> proto::Certificate {
    proto::Certificate {
        id: id.to_string(),
        tls_type: certificate_type_to_proto(record.cert_type) as i32,
        key_pem: record.key_pem.clone(),
        cert_pem: record.cert_pem.clone(),
        domains: record.domains.clone(),
        not_after_ms: record.not_after.map(to_ms),
    }
}

/// Rebuild a [`NodeState`] from a pushed snapshot.
///
/// Returns the state and the controller's update time, if any.
pub fn state_from_snapshot(
    snapshot: proto::StateSnapshot,
) -> Result<(NodeState, Option<DateTime<Utc>>), ProtocolError> {
    let mut state = NodeState::new();

    for site in snapshot.sites {
        let tls_type = certificate_type_from_proto(site.tls_type());
        let app = match non_empty(site.app_name) {
            Some(name) => {
                let manifest = match non_empty(site.app_manifest_json) {
                    Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                        ProtocolError::InvalidMessage(format!(
                            "site '{}' has an invalid app manifest: {}",
                            site.domain, e
                        ))
                    })?),
                    None => None,
                };
                Some(AppRef { name, manifest })
            }
            None => None,
        };

        state.sites.push(SiteState {
            domain: site.domain,
            aliases: site.aliases,
            tls: SiteTls {
                cert_type: tls_type,
                imported_name: non_empty(site.imported_name),
                imported_version: None,
            },
            generated_tls_id: non_empty(site.generated_tls_id).map(CertificateId::from),
            imported_tls_id: non_empty(site.imported_tls_id).map(CertificateId::from),
            app,
        });
    }

    state.dh_params = snapshot.dh_params.map(|dh| DhParams {
        pem: dh.pem,
        date: dh.date_ms.and_then(from_ms),
    });

    for cert in snapshot.certificates {
        if cert.id.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "certificate without an ID".to_string(),
            ));
        }
        let cert_type = certificate_type_from_proto(cert.tls_type());
        let mut record = CertificateRecord::from_pem(cert_type, cert.key_pem, cert.cert_pem);
        record.domains = cert.domains;
        record.not_after = cert.not_after_ms.and_then(from_ms);
        state.certificates.insert(CertificateId::from(cert.id), record);
    }

    state.codesign_key = non_empty(snapshot.codesign_key);

    let updated_at = if snapshot.updated_at_ms > 0 {
        from_ms(snapshot.updated_at_ms)
    } else {
        None
    };

    Ok((state, updated_at))
}
