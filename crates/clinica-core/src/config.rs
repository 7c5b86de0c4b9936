//! Configuration loading and validation
//!
//! Policy tables, aggregate registries and engine settings are static TOML
//! documents loaded once at startup. Each loaded type implements
//! [`ConfigValidation`] so a bad document is rejected before anything runs.

use crate::ClinicaError;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;

/// Trait for configuration validation
pub trait ConfigValidation {
    /// Validate this configuration
    fn validate(&self) -> Result<(), ClinicaError>;
}

/// Parse and validate a TOML document
pub fn parse_toml<T>(content: &str) -> Result<T, ClinicaError>
where
    T: DeserializeOwned + ConfigValidation,
{
    let value: T = toml::from_str(content)?;
    value.validate()?;
    Ok(value)
}

/// Load, parse and validate a TOML file
pub fn load_toml<T>(path: &Path) -> Result<T, ClinicaError>
where
    T: DeserializeOwned + ConfigValidation,
{
    let content = std::fs::read_to_string(path).map_err(|e| {
        ClinicaError::config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), "loading configuration");
    parse_toml(&content)
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Value is required but missing
    Required { field: String },
    /// Value is out of acceptable range
    OutOfRange {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
        actual: f64,
    },
    /// Custom validation failed
    Custom { field: String, message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Required { field } => {
                write!(f, "Field '{field}' is required but missing")
            }
            ValidationError::OutOfRange {
                field,
                min,
                max,
                actual,
            } => {
                let range_desc = match (min, max) {
                    (Some(min), Some(max)) => format!("between {min} and {max}"),
                    (Some(min), None) => format!("at least {min}"),
                    (None, Some(max)) => format!("at most {max}"),
                    (None, None) => "in valid range".to_string(),
                };
                write!(f, "Field '{field}' must be {range_desc} (got {actual})")
            }
            ValidationError::Custom { field, message } => {
                write!(f, "Field '{field}': {message}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ClinicaError {
    fn from(err: ValidationError) -> Self {
        ClinicaError::config(err.to_string())
    }
}

/// Configuration validator that accumulates validation failures
#[derive(Debug, Default)]
pub struct ConfigValidator {
    errors: Vec<ValidationError>,
    field_prefix: String,
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator for a nested field
    pub fn for_field(&self, field_name: &str) -> Self {
        Self {
            errors: Vec::new(),
            field_prefix: self.full_field_name(field_name),
        }
    }

    /// Validate that a string value is present and non-empty
    pub fn non_empty(&mut self, field_name: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.errors.push(ValidationError::Required {
                field: self.full_field_name(field_name),
            });
        }
        self
    }

    /// Validate that a number is within range
    pub fn range<T>(
        &mut self,
        field_name: &str,
        value: T,
        min: Option<T>,
        max: Option<T>,
    ) -> &mut Self
    where
        T: PartialOrd + Copy + Into<f64>,
    {
        let below = min.is_some_and(|min| value < min);
        let above = max.is_some_and(|max| value > max);

        if below || above {
            self.errors.push(ValidationError::OutOfRange {
                field: self.full_field_name(field_name),
                min: min.map(Into::into),
                max: max.map(Into::into),
                actual: value.into(),
            });
        }
        self
    }

    /// Record a failure when `ok` is false
    pub fn check(&mut self, field_name: &str, ok: bool, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(ValidationError::Custom {
                field: self.full_field_name(field_name),
                message: message.to_string(),
            });
        }
        self
    }

    /// Merge errors from another validator
    pub fn merge(&mut self, other: ConfigValidator) {
        self.errors.extend(other.errors);
    }

    /// Get validation result, reporting the first failure
    pub fn result(self) -> Result<(), ValidationError> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(first),
        }
    }

    /// Get all validation errors
    pub fn all_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    fn full_field_name(&self, field_name: &str) -> String {
        if self.field_prefix.is_empty() {
            field_name.to_string()
        } else {
            format!("{}.{}", self.field_prefix, field_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Limits {
        name: String,
        workers: u32,
    }

    impl ConfigValidation for Limits {
        fn validate(&self) -> Result<(), ClinicaError> {
            let mut v = ConfigValidator::new();
            v.non_empty("name", &self.name)
                .range("workers", self.workers, Some(1), Some(64));
            Ok(v.result()?)
        }
    }

    #[test]
    fn parse_accepts_valid_document() {
        let limits: Limits = parse_toml("name = \"engine\"\nworkers = 4\n").unwrap();
        assert_eq!(limits.workers, 4);
    }

    #[test]
    fn parse_rejects_out_of_range_values() {
        let err = parse_toml::<Limits>("name = \"engine\"\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, ClinicaError::Config { .. }));
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn parse_rejects_malformed_toml() {
        let err = parse_toml::<Limits>("name = ").unwrap_err();
        assert!(matches!(err, ClinicaError::Config { .. }));
    }

    #[test]
    fn nested_validator_prefixes_fields() {
        let root = ConfigValidator::new();
        let mut nested = root.for_field("rules[2]");
        nested.non_empty("resource_type", "");
        let errors = nested.all_errors();
        assert_eq!(
            errors,
            vec![ValidationError::Required {
                field: "rules[2].resource_type".to_string()
            }]
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_toml::<Limits>(Path::new("/nonexistent/clinica.toml")).unwrap_err();
        assert!(matches!(err, ClinicaError::Config { .. }));
    }
}
