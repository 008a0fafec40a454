//! Wire messages for `sitefleet.v1.Controller`.
//!
//! Snapshots are always complete: a node that missed updates simply applies
//! the next one it receives.

/// TLS certificate source, as carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CertificateType {
    Unspecified = 0,
    SelfSigned = 1,
    Imported = 2,
    Acme = 3,
}

/// Full desired state for a node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateSnapshot {
    #[prost(message, repeated, tag = "1")]
    pub sites: ::prost::alloc::vec::Vec<Site>,
    #[prost(message, optional, tag = "2")]
    pub dh_params: ::core::option::Option<DhParams>,
    #[prost(message, repeated, tag = "3")]
    pub certificates: ::prost::alloc::vec::Vec<Certificate>,
    #[prost(string, tag = "4")]
    pub codesign_key: ::prost::alloc::string::String,
    /// Controller-side time of the last local state replacement
    #[prost(int64, tag = "5")]
    pub updated_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Site {
    #[prost(string, tag = "1")]
    pub domain: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub aliases: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(enumeration = "CertificateType", tag = "3")]
    pub tls_type: i32,
    #[prost(string, tag = "4")]
    pub generated_tls_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub imported_tls_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub imported_name: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub app_name: ::prost::alloc::string::String,
    /// App manifest, JSON encoded; empty when absent
    #[prost(string, tag = "8")]
    pub app_manifest_json: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DhParams {
    #[prost(string, tag = "1")]
    pub pem: ::prost::alloc::string::String,
    #[prost(int64, optional, tag = "2")]
    pub date_ms: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Certificate {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "CertificateType", tag = "2")]
    pub tls_type: i32,
    #[prost(string, tag = "3")]
    pub key_pem: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub cert_pem: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "5")]
    pub domains: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, optional, tag = "6")]
    pub not_after_ms: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStateRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WatchStateRequest {
    #[prost(string, tag = "1")]
    pub node_name: ::prost::alloc::string::String,
}

/// Server-initiated health probe.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthPing {
    /// ID the controller assigned to this health channel
    #[prost(string, tag = "1")]
    pub node_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    #[prost(int64, tag = "3")]
    pub timestamp_ms: i64,
}

/// Node answer to a [`HealthPing`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthReport {
    #[prost(string, tag = "1")]
    pub node_name: ::prost::alloc::string::String,
    /// Sequence of the ping being answered
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    #[prost(message, repeated, tag = "3")]
    pub sites: ::prost::alloc::vec::Vec<SiteHealth>,
    #[prost(int64, tag = "4")]
    pub timestamp_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SiteHealth {
    #[prost(string, tag = "1")]
    pub domain: ::prost::alloc::string::String,
    /// Probe error; unset when the site is healthy
    #[prost(string, optional, tag = "2")]
    pub error: ::core::option::Option<::prost::alloc::string::String>,
}

include!(concat!(env!("OUT_DIR"), "/sitefleet.v1.Controller.rs"));
