//! Configuration validation
//!
//! Collects errors and warnings across all checks so operators see every
//! problem in one pass.

pub mod certs;
pub mod lint;

use std::fmt;

use thiserror::Error;

/// Category of a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A numeric or length constraint was violated
    Range,
    /// Certificate lifecycle settings are inconsistent
    Certificate,
    /// A referenced path is missing or unusable
    Path,
    /// Notification settings are invalid
    Notification,
}

/// A fatal validation problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.category, self.message)
    }
}

/// A non-fatal observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accumulated validation outcome
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Configuration rejected at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Flatten nested `validator` errors into `(field.path, message)` pairs.
pub(crate) fn flatten_field_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
) -> Vec<(String, String)> {
    use validator::ValidationErrorsKind;

    let mut out = Vec::new();
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for e in field_errors {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' constraint", e.code));
                    out.push((path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                out.extend(flatten_field_errors(&path, nested));
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    out.extend(flatten_field_errors(&format!("{}[{}]", path, index), nested));
                }
            }
        }
    }
    out
}
