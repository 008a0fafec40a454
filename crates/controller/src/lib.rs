//! Sitefleet controller.
//!
//! The controller holds the desired configuration for a fleet of
//! static-site hosting nodes, pushes it to them over gRPC and manages the
//! TLS certificate lifecycle of every hosted site.
//!
//! - [`state`]: the authoritative snapshot and its storage backends
//! - [`certs`]: certificate sources, inspection, renewal and expiry alerts
//! - [`jobs`]: deduplicated, leader-gated background jobs
//! - [`dhparams`]: periodic DH parameter regeneration
//! - [`notifications`]: operator alert fan-out
//! - [`rpc`]: lifecycle of the node-facing RPC server

mod app;
pub mod certs;
pub mod dhparams;
pub mod jobs;
pub mod notifications;
pub mod rpc;
pub mod signals;
pub mod state;

pub use app::SitefleetController;
pub use certs::{CertError, CertificateEngine, CertificateMonitor};
pub use jobs::{JobCoordinator, JobError, JobSpec};
pub use notifications::{Notification, Notifier, Severity};
pub use rpc::{RpcError, RpcService};
pub use state::{StateError, StateManager};
