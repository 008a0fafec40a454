//! Node-facing protocol for the sitefleet controller.
//!
//! The controller serves `sitefleet.v1.Controller` over gRPC:
//!
//! - `GetState`: unary fetch of the full state snapshot
//! - `WatchState`: server stream pushing a full snapshot on every change
//! - `HealthChannel`: bidirectional stream where the controller pings and
//!   the node answers with a health report
//!
//! Snapshots are never diffs. A node that missed updates simply applies the
//! next snapshot it receives.

pub mod client;
pub mod convert;
pub mod drain;
mod errors;
mod health;
pub mod proto;
pub mod registry;
pub mod server;

pub use client::{CacheUpdate, CertCache, CertCacheItem, StateClient, StateWatch};
pub use drain::{StreamGuard, StreamTracker};
pub use errors::ProtocolError;
pub use health::{NodeHealth, NodeInfo};
pub use registry::NodeRegistry;
pub use server::{StateProvider, StateServer, NODE_NAME_METADATA};
