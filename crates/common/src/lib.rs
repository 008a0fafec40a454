//! Shared types for the sitefleet controller and its worker nodes.
//!
//! - [`state`]: the authoritative [`NodeState`] snapshot and its parts
//! - [`ids`]: typed identifiers that cross the RPC boundary
//! - [`signal`]: the payload-free [`Broadcaster`] used for push-on-change

pub mod ids;
pub mod signal;
pub mod state;

pub use ids::{CertificateId, JobId, NodeId};
pub use signal::{Broadcaster, SubscriberId, Subscription};
pub use state::{
    AppRef, CertificateRecord, CertificateType, DhParams, NodeState, SiteState, SiteTls,
    StateValidationError,
};
