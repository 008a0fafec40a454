//! Configuration linting
//!
//! Checks configuration for settings that work but are likely mistakes.

use super::{ValidationResult, ValidationWarning};
use crate::Config;

/// Warn about settings that parse but are probably unintended
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.notifications.webhooks.is_empty() && !config.notifications.log {
        result.add_warning(ValidationWarning::new(
            "No notification senders configured; certificate expiry alerts will be dropped",
        ));
    }

    for url in &config.notifications.webhooks {
        if url.starts_with("http://") {
            result.add_warning(ValidationWarning::new(format!(
                "Webhook '{}' uses plain HTTP (https recommended)",
                url
            )));
        }
    }

    if config.dhparams.bits < 2048 {
        result.add_warning(ValidationWarning::new(format!(
            "DH parameters of {} bits are considered weak (2048 or more recommended)",
            config.dhparams.bits
        )));
    }

    if config.rpc.address.starts_with("0.0.0.0") {
        result.add_warning(ValidationWarning::new(format!(
            "RPC server listens on all interfaces ({}); node traffic should stay on a private network",
            config.rpc.address
        )));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lint_missing_senders() {
        let config = Config::default();
        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("No notification senders")));
    }

    #[test]
    fn test_lint_plain_http_webhook() {
        let mut config = Config::default();
        config.notifications.webhooks = vec!["http://hooks.example".to_string()];

        let result = lint_config(&config);
        assert!(result.warnings.iter().any(|w| w.message.contains("plain HTTP")));
        assert!(result.errors.is_empty());
    }
}
