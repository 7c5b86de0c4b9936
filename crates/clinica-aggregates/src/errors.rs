//! Aggregate engine errors

use crate::record::ParentKey;
use clinica_core::{ClinicaError, FieldName, ResourceType};
use std::time::Duration;

/// Failure reported by a persistence port
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// Backend temporarily unreachable or overloaded
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Backend detail
        message: String,
    },

    /// Backend did not answer in time
    #[error("storage timed out: {message}")]
    Timeout {
        /// Backend detail
        message: String,
    },

    /// Target record does not exist
    #[error("record not found: {message}")]
    NotFound {
        /// What was missing
        message: String,
    },

    /// Backend refused the request
    #[error("storage rejected request: {message}")]
    Rejected {
        /// Backend detail
        message: String,
    },
}

impl PersistenceError {
    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Whether retrying may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Errors surfaced by the aggregate engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    /// Reading the qualifying children failed
    #[error("failed to read children of {parent}: {source}")]
    ReadFailure {
        /// Parent being recomputed
        parent: ParentKey,
        /// Port failure
        source: PersistenceError,
    },

    /// Writing the aggregate field failed
    #[error("failed to write aggregate of {parent}: {source}")]
    WriteFailure {
        /// Parent being recomputed
        parent: ParentKey,
        /// Port failure
        source: PersistenceError,
    },

    /// A recompute attempt exceeded its deadline
    #[error("recompute of {parent} timed out after {after:?}")]
    Timeout {
        /// Parent being recomputed
        parent: ParentKey,
        /// Deadline that elapsed
        after: Duration,
    },

    /// A caller tried to write an engine-owned field
    #[error("{parent_type}.{field} is maintained by the aggregate engine")]
    ReservedField {
        /// Parent type
        parent_type: ResourceType,
        /// Aggregate field
        field: FieldName,
    },

    /// No definition targets the parent type or field
    #[error("no aggregate defined for {parent_type}{}", field_suffix(.field))]
    UnknownAggregate {
        /// Parent type
        parent_type: ResourceType,
        /// Target field, when one was named
        field: Option<FieldName>,
    },

    /// The change event is internally inconsistent
    #[error("malformed change event: {message}")]
    MalformedEvent {
        /// What was inconsistent
        message: String,
    },

    /// Subscribing to child changes failed
    #[error("failed to subscribe to {child_type} changes: {source}")]
    Subscription {
        /// Child type
        child_type: ResourceType,
        /// Port failure
        source: PersistenceError,
    },

    /// The recompute queue no longer accepts work
    #[error("recompute queue is closed")]
    QueueClosed,

    /// A queue shard has no free capacity
    #[error("recompute queue is full")]
    QueueFull,

    /// Definitions or engine configuration are malformed
    #[error("invalid aggregate configuration: {message}")]
    InvalidConfiguration {
        /// What was wrong
        message: String,
    },
}

impl AggregateError {
    /// Whether retrying may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ReadFailure { source, .. } | Self::WriteFailure { source, .. } => {
                source.is_transient()
            }
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Parent the failure concerns, if any
    pub fn parent(&self) -> Option<&ParentKey> {
        match self {
            Self::ReadFailure { parent, .. }
            | Self::WriteFailure { parent, .. }
            | Self::Timeout { parent, .. } => Some(parent),
            _ => None,
        }
    }
}

impl From<ClinicaError> for AggregateError {
    fn from(err: ClinicaError) -> Self {
        let message = match err {
            ClinicaError::Config { message } | ClinicaError::Invalid { message } => message,
            other => other.to_string(),
        };
        Self::InvalidConfiguration { message }
    }
}

impl From<AggregateError> for ClinicaError {
    fn from(err: AggregateError) -> Self {
        match &err {
            AggregateError::ReadFailure { .. }
            | AggregateError::WriteFailure { .. }
            | AggregateError::Subscription { .. } => ClinicaError::storage(err.to_string()),
            AggregateError::Timeout { .. } => ClinicaError::timeout(err.to_string()),
            AggregateError::ReservedField { .. } => {
                ClinicaError::permission_denied(err.to_string())
            }
            AggregateError::UnknownAggregate { .. } => ClinicaError::not_found(err.to_string()),
            AggregateError::MalformedEvent { .. } => ClinicaError::invalid(err.to_string()),
            AggregateError::QueueClosed | AggregateError::QueueFull => {
                ClinicaError::internal(err.to_string())
            }
            AggregateError::InvalidConfiguration { message } => {
                ClinicaError::config(message.clone())
            }
        }
    }
}

/// Result alias for aggregate operations
pub type AggregateResult<T> = Result<T, AggregateError>;

fn field_suffix(field: &Option<FieldName>) -> String {
    field.as_ref().map(|f| format!(".{f}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_follows_the_port() {
        let parent = ParentKey::new("treatments", "t1");
        let transient = AggregateError::ReadFailure {
            parent: parent.clone(),
            source: PersistenceError::unavailable("connection reset"),
        };
        let permanent = AggregateError::WriteFailure {
            parent: parent.clone(),
            source: PersistenceError::not_found("treatments:t1"),
        };

        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
        assert_eq!(permanent.parent(), Some(&parent));
        assert_eq!(
            ClinicaError::from(transient),
            ClinicaError::storage(
                "failed to read children of treatments:t1: storage unavailable: connection reset"
            )
        );
    }

    #[test]
    fn unknown_aggregate_names_the_field() {
        let err = AggregateError::UnknownAggregate {
            parent_type: "clinics".into(),
            field: Some("averagePrice".into()),
        };
        assert_eq!(err.to_string(), "no aggregate defined for clinics.averagePrice");
    }
}
