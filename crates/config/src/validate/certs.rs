//! Certificate lifecycle validation
//!
//! Checks that renewal windows and notification offsets are consistent and
//! that the custodial store directory exists.

use std::collections::HashSet;
use std::path::Path;

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Validate certificate lifecycle settings
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let certs = &config.certificates;

    // A renewal window at least as long as the validity would renew on every check
    if certs.self_signed_min_validity_days >= certs.self_signed_validity_days {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!(
                "self-signed-min-validity-days ({}) must be shorter than self-signed-validity-days ({})",
                certs.self_signed_min_validity_days, certs.self_signed_validity_days
            ),
        ));
    }

    if certs.acme_min_validity_days > certs.self_signed_min_validity_days {
        result.add_warning(ValidationWarning::new(format!(
            "acme-min-validity-days ({}) is longer than self-signed-min-validity-days ({})",
            certs.acme_min_validity_days, certs.self_signed_min_validity_days
        )));
    }

    let mut seen = HashSet::new();
    for day in &certs.notification_days {
        if !seen.insert(*day) {
            result.add_error(ValidationError::new(
                ErrorCategory::Notification,
                format!("notification-days contains {} more than once", day),
            ));
        }
    }

    if let Some(ref store) = config.custodial_store {
        if !Path::new(&store.path).is_dir() {
            result.add_error(ValidationError::new(
                ErrorCategory::Path,
                format!("Custodial store directory not found: {:?}", store.path),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CustodialStoreConfig;

    #[test]
    fn test_validate_missing_custodial_store() {
        let config = Config {
            custodial_store: Some(CustodialStoreConfig {
                path: "/nonexistent/custodial".into(),
            }),
            ..Default::default()
        };

        let result = validate_certificates(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Custodial store directory not found")));
    }

    #[test]
    fn test_validate_renewal_window_longer_than_validity() {
        let mut config = Config::default();
        config.certificates.self_signed_validity_days = 10;
        config.certificates.self_signed_min_validity_days = 14;

        let result = validate_certificates(&config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Certificate);
    }

    #[test]
    fn test_validate_duplicate_notification_days() {
        let mut config = Config::default();
        config.certificates.notification_days = vec![7, 3, 7];

        let result = validate_certificates(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.category == ErrorCategory::Notification));
    }

    #[test]
    fn test_defaults_pass() {
        let result = validate_certificates(&Config::default());
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }
}
