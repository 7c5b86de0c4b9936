//! Clinica Core - shared foundation for the policy and aggregate crates
//!
//! This crate holds the pieces both subsystems agree on:
//! - identifier newtypes for scopes, identities, records and resource types
//! - the unified [`ClinicaError`] type and [`Result`] alias
//! - configuration loading and validation traits
//! - the retry/backoff policy used for transient storage failures
//!
//! It contains no policy or aggregate logic of its own.

#![forbid(unsafe_code)]

/// Unified error handling
pub mod errors;

/// Scope, identity, record and resource identifiers
pub mod identifiers;

/// Configuration loading and validation
pub mod config;

/// Retry and backoff policy for transient failures
pub mod reliability;

pub use config::{load_toml, parse_toml, ConfigValidation, ConfigValidator, ValidationError};
pub use errors::{ClinicaError, Result};
pub use identifiers::{FieldName, IdentityId, LifecycleState, RecordKey, ResourceType, ScopeId};
pub use reliability::{BackoffStrategy, RetryPolicy, RetryResult};
