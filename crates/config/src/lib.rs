//! Configuration for the sitefleet controller.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! rpc {
//!     address "0.0.0.0:2265"
//!     graceful-shutdown-timeout-secs 10
//!     health-probe-interval-secs 30
//! }
//!
//! state {
//!     path "/var/lib/sitefleet/state.json"
//! }
//!
//! certificates {
//!     monitor-interval-secs 43200
//!     self-signed-validity-days 365
//!     self-signed-min-validity-days 14
//!     acme-min-validity-days 7
//!     notification-days 30 14 7 3 2 1 0 -1 -2
//! }
//!
//! dhparams {
//!     bits 4096
//!     max-age-days 120
//! }
//!
//! notifications {
//!     webhook "https://hooks.example.com/sitefleet"
//! }
//!
//! custodial-store {
//!     path "/var/lib/sitefleet/custodial"
//! }
//! ```
//!
//! Every block is optional; missing values fall back to the defaults below.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

mod kdl;
pub mod validate;

pub use validate::{ConfigError, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Default notification offsets (days relative to expiry), least urgent first.
pub const DEFAULT_NOTIFICATION_DAYS: [i64; 9] = [30, 14, 7, 3, 2, 1, 0, -1, -2];

// ============================================================================
// Configuration Model
// ============================================================================

/// Root controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub rpc: RpcConfig,
    pub state: StateConfig,
    #[validate(nested)]
    pub certificates: CertificatesConfig,
    #[validate(nested)]
    pub dhparams: DhParamsConfig,
    pub notifications: NotificationsConfig,
    pub custodial_store: Option<CustodialStoreConfig>,
}

/// Node-facing RPC server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RpcConfig {
    pub address: String,
    #[validate(range(min = 1, max = 300))]
    pub graceful_shutdown_timeout_secs: u64,
    /// How often connected nodes are asked for a health report
    #[validate(range(min = 1, max = 3600))]
    pub health_probe_interval_secs: u64,
}

/// Persisted state location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

/// Certificate lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CertificatesConfig {
    #[validate(range(min = 60))]
    pub monitor_interval_secs: u64,
    #[validate(range(min = 1, max = 3650))]
    pub self_signed_validity_days: u32,
    #[validate(range(min = 1, max = 365))]
    pub self_signed_min_validity_days: u32,
    #[validate(range(min = 1, max = 90))]
    pub acme_min_validity_days: u32,
    #[validate(length(min = 1))]
    pub notification_days: Vec<i64>,
}

/// Diffie-Hellman parameter regeneration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DhParamsConfig {
    #[validate(range(min = 1024, max = 8192))]
    pub bits: u32,
    #[validate(range(min = 1))]
    pub max_age_days: u32,
    #[validate(range(min = 60))]
    pub check_interval_secs: u64,
    pub openssl_path: String,
}

/// Operator notification senders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub webhooks: Vec<String>,
    /// Also emit every notification as a log warning
    pub log: bool,
}

/// Directory-backed custodial certificate store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodialStoreConfig {
    pub path: PathBuf,
}

pub(crate) fn default_rpc_address() -> String {
    "0.0.0.0:2265".to_string()
}

pub(crate) fn default_graceful_shutdown_timeout() -> u64 {
    10
}

pub(crate) fn default_health_probe_interval() -> u64 {
    30
}

pub(crate) fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/sitefleet/state.json")
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            address: default_rpc_address(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
            health_probe_interval_secs: default_health_probe_interval(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 12 * 3600,
            self_signed_validity_days: 365,
            self_signed_min_validity_days: 14,
            acme_min_validity_days: 7,
            notification_days: DEFAULT_NOTIFICATION_DAYS.to_vec(),
        }
    }
}

impl Default for DhParamsConfig {
    fn default() -> Self {
        Self {
            bits: 4096,
            max_age_days: 120,
            check_interval_secs: 6 * 3600,
            openssl_path: "openssl".to_string(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from KDL text
    pub fn from_kdl(content: &str) -> Result<Self> {
        let config = kdl::parse_config(content)?;
        debug!(
            rpc_address = %config.rpc.address,
            state_path = %config.state.path.display(),
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Validate field ranges and cross-field constraints.
    ///
    /// Returns every error found rather than stopping at the first one.
    pub fn validate(&self) -> std::result::Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::new();

        if let Err(errors) = Validate::validate(self) {
            for (field, message) in validate::flatten_field_errors("", &errors) {
                result.add_error(ValidationError::new(
                    ErrorCategory::Range,
                    format!("{}: {}", field, message),
                ));
            }
        }

        result.merge(validate::certs::validate_certificates(self));
        result.merge(validate::lint::lint_config(self));

        if result.errors.is_empty() {
            Ok(result)
        } else {
            Err(ConfigError::Invalid(result.errors))
        }
    }
}
