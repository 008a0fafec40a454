//! Controller block parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::{
    default_graceful_shutdown_timeout, default_health_probe_interval, default_rpc_address,
    default_state_path,
    CertificatesConfig, CustodialStoreConfig, DhParamsConfig, NotificationsConfig, RpcConfig,
    StateConfig,
};

use super::helpers::{
    get_bool_entry, get_int_entry, get_int_list_entry, get_repeated_string_entries,
    get_string_entry,
};

/// Parse the `rpc` block
pub fn parse_rpc_config(node: &kdl::KdlNode) -> Result<RpcConfig> {
    trace!("Parsing rpc configuration block");

    let config = RpcConfig {
        address: get_string_entry(node, "address").unwrap_or_else(default_rpc_address),
        graceful_shutdown_timeout_secs: get_int_entry(node, "graceful-shutdown-timeout-secs")
            .map(|v| v as u64)
            .unwrap_or_else(default_graceful_shutdown_timeout),
        health_probe_interval_secs: get_int_entry(node, "health-probe-interval-secs")
            .map(|v| v as u64)
            .unwrap_or_else(default_health_probe_interval),
    };

    trace!(address = %config.address, "Parsed rpc configuration");
    Ok(config)
}

/// Parse the `state` block
pub fn parse_state_config(node: &kdl::KdlNode) -> Result<StateConfig> {
    trace!("Parsing state configuration block");

    Ok(StateConfig {
        path: get_string_entry(node, "path")
            .map(PathBuf::from)
            .unwrap_or_else(default_state_path),
    })
}

/// Parse the `certificates` block
pub fn parse_certificates_config(node: &kdl::KdlNode) -> Result<CertificatesConfig> {
    trace!("Parsing certificates configuration block");
    let defaults = CertificatesConfig::default();

    let notification_days = match get_int_list_entry(node, "notification-days") {
        Some(days) if days.is_empty() => {
            return Err(anyhow::anyhow!(
                "'notification-days' requires at least one value, e.g., notification-days 30 14 7"
            ));
        }
        Some(days) => days.into_iter().map(|d| d as i64).collect(),
        None => defaults.notification_days,
    };

    let config = CertificatesConfig {
        monitor_interval_secs: get_int_entry(node, "monitor-interval-secs")
            .map(|v| v as u64)
            .unwrap_or(defaults.monitor_interval_secs),
        self_signed_validity_days: get_int_entry(node, "self-signed-validity-days")
            .map(|v| v as u32)
            .unwrap_or(defaults.self_signed_validity_days),
        self_signed_min_validity_days: get_int_entry(node, "self-signed-min-validity-days")
            .map(|v| v as u32)
            .unwrap_or(defaults.self_signed_min_validity_days),
        acme_min_validity_days: get_int_entry(node, "acme-min-validity-days")
            .map(|v| v as u32)
            .unwrap_or(defaults.acme_min_validity_days),
        notification_days,
    };

    trace!(
        monitor_interval_secs = config.monitor_interval_secs,
        notification_days = ?config.notification_days,
        "Parsed certificates configuration"
    );
    Ok(config)
}

/// Parse the `dhparams` block
pub fn parse_dhparams_config(node: &kdl::KdlNode) -> Result<DhParamsConfig> {
    trace!("Parsing dhparams configuration block");
    let defaults = DhParamsConfig::default();

    Ok(DhParamsConfig {
        bits: get_int_entry(node, "bits")
            .map(|v| v as u32)
            .unwrap_or(defaults.bits),
        max_age_days: get_int_entry(node, "max-age-days")
            .map(|v| v as u32)
            .unwrap_or(defaults.max_age_days),
        check_interval_secs: get_int_entry(node, "check-interval-secs")
            .map(|v| v as u64)
            .unwrap_or(defaults.check_interval_secs),
        openssl_path: get_string_entry(node, "openssl-path").unwrap_or(defaults.openssl_path),
    })
}

/// Parse the `notifications` block
pub fn parse_notifications_config(node: &kdl::KdlNode) -> Result<NotificationsConfig> {
    trace!("Parsing notifications configuration block");

    let webhooks = get_repeated_string_entries(node, "webhook");
    for url in &webhooks {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "Invalid webhook URL '{}', expected an http:// or https:// URL",
                url
            ));
        }
    }

    let config = NotificationsConfig {
        webhooks,
        log: get_bool_entry(node, "log").unwrap_or(false),
    };

    trace!(
        webhook_count = config.webhooks.len(),
        log = config.log,
        "Parsed notifications configuration"
    );
    Ok(config)
}

/// Parse the `custodial-store` block
pub fn parse_custodial_store_config(node: &kdl::KdlNode) -> Result<CustodialStoreConfig> {
    trace!("Parsing custodial-store configuration block");

    let path = get_string_entry(node, "path").ok_or_else(|| {
        anyhow::anyhow!(
            "custodial-store requires a 'path' field, e.g., path \"/var/lib/sitefleet/custodial\""
        )
    })?;

    Ok(CustodialStoreConfig {
        path: PathBuf::from(path),
    })
}
