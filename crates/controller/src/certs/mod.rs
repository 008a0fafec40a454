//! TLS certificate lifecycle.
//!
//! - [`inspect`]: X.509 parsing and validation against a site
//! - [`selfsigned`]: self-signed generation with `rcgen`
//! - [`custodial`]: the custodial (imported) certificate source
//! - [`CertificateEngine`]: source resolution, issuance and replacement
//! - [`CertificateMonitor`]: periodic renewal and expiry notifications

pub mod custodial;
mod engine;
mod error;
pub mod inspect;
mod monitor;
pub mod selfsigned;

pub use custodial::{CustodialCertificate, CustodialStore, DirectoryCustodialStore};
pub use engine::{CertificateEngine, CertificateIssuer, CertificatePolicy, IssuedCertificate};
pub use error::CertError;
pub use inspect::{describe_certificate, inspect_certificate, parse_certificate, CertificateInfo};
pub use monitor::{CertificateMonitor, MonitorReport};
pub use selfsigned::generate_self_signed;
