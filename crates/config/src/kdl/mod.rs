//! KDL configuration parsing.

mod controller;
mod helpers;

use anyhow::Result;
use kdl::KdlDocument;
use tracing::{trace, warn};

use crate::Config;

use controller::*;

/// Parse a whole configuration document
pub(crate) fn parse_config(content: &str) -> Result<Config> {
    let doc: KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        let report = miette::Report::new(e).with_source_code(content.to_string());
        anyhow::anyhow!("KDL syntax error:\n{:?}", report)
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        let name = node.name().value();
        trace!(block = name, "Parsing configuration block");
        match name {
            "rpc" => config.rpc = parse_rpc_config(node)?,
            "state" => config.state = parse_state_config(node)?,
            "certificates" => config.certificates = parse_certificates_config(node)?,
            "dhparams" => config.dhparams = parse_dhparams_config(node)?,
            "notifications" => config.notifications = parse_notifications_config(node)?,
            "custodial-store" => {
                config.custodial_store = Some(parse_custodial_store_config(node)?)
            }
            other => {
                warn!(block = other, "Ignoring unknown configuration block");
            }
        }
    }

    Ok(config)
}
