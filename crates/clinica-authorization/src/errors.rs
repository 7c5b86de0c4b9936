//! Authorization errors
//!
//! Denial is a normal [`Decision`](crate::Decision) value inside the evaluator.
//! It only becomes an error at the enforcement boundary, where every denial
//! (including unconfigured resource types and malformed inputs) collapses into
//! a single [`PolicyError::PolicyDenied`].

use crate::policy::DenialReason;
use clinica_core::ClinicaError;

/// Errors surfaced by the authorization crate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The actor may not perform the action
    ///
    /// Display is deliberately generic; the reason is for logs and tests.
    #[error("not permitted")]
    PolicyDenied {
        /// Why the evaluator denied
        reason: DenialReason,
    },

    /// Policy configuration is malformed
    #[error("invalid policy configuration: {message}")]
    InvalidConfiguration {
        /// What was wrong
        message: String,
    },
}

impl PolicyError {
    /// Denial reason, if this is a denial
    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            PolicyError::PolicyDenied { reason } => Some(reason),
            PolicyError::InvalidConfiguration { .. } => None,
        }
    }
}

impl From<ClinicaError> for PolicyError {
    fn from(err: ClinicaError) -> Self {
        let message = match err {
            ClinicaError::Config { message } | ClinicaError::Invalid { message } => message,
            other => other.to_string(),
        };
        PolicyError::InvalidConfiguration { message }
    }
}

impl From<PolicyError> for ClinicaError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::PolicyDenied { .. } => ClinicaError::permission_denied("not permitted"),
            PolicyError::InvalidConfiguration { message } => ClinicaError::config(message),
        }
    }
}

/// Result alias for authorization operations
pub type PolicyResult<T> = Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_renders_generically() {
        let err = PolicyError::PolicyDenied {
            reason: DenialReason::ScopeMismatch,
        };
        assert_eq!(err.to_string(), "not permitted");
        assert_eq!(err.denial_reason(), Some(&DenialReason::ScopeMismatch));

        let core: ClinicaError = err.into();
        assert_eq!(core, ClinicaError::permission_denied("not permitted"));
    }

    #[test]
    fn config_errors_keep_their_message() {
        let err = PolicyError::from(ClinicaError::config("rules[0]: bad"));
        assert_eq!(
            err,
            PolicyError::InvalidConfiguration {
                message: "rules[0]: bad".to_string()
            }
        );
    }
}
