//! Access control enforcement
//!
//! [`PolicyEvaluator`] owns the shared rule table and converts evaluator
//! decisions into `Result`s the transport layer can `?` on. Every denial,
//! whatever its reason, reaches the caller as [`PolicyError::PolicyDenied`].

use crate::actor::Actor;
use crate::errors::{PolicyError, PolicyResult};
use crate::policy::{evaluate, Decision, DenialReason, PolicyTable, VisibilityPredicate};
use crate::resource::{Action, ResourceDescriptor};
use std::sync::Arc;

/// Shareable handle to an immutable policy table
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    table: Arc<PolicyTable>,
}

impl PolicyEvaluator {
    /// Wrap an owned table
    pub fn new(table: PolicyTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// Wrap a table already shared elsewhere
    pub fn from_shared(table: Arc<PolicyTable>) -> Self {
        Self { table }
    }

    /// Underlying rule table
    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Raw decision, see [`evaluate`]
    pub fn evaluate(
        &self,
        actor: &Actor,
        action: &Action,
        resource: &ResourceDescriptor,
    ) -> Decision {
        evaluate(&self.table, actor, action, resource)
    }

    /// Enforce a decision before any mutation or query
    ///
    /// Returns the visibility predicate for reads, which the caller must AND
    /// into its query, and `None` for every other allowed action.
    pub fn authorize(
        &self,
        actor: &Actor,
        action: &Action,
        resource: &ResourceDescriptor,
    ) -> PolicyResult<Option<VisibilityPredicate>> {
        match self.evaluate(actor, action, resource) {
            Decision::Allow => Ok(None),
            Decision::AllowWithFilter(predicate) => Ok(Some(predicate)),
            Decision::Deny(reason) => Err(PolicyError::PolicyDenied { reason }),
        }
    }

    /// Enforce access to one concrete, already loaded instance
    ///
    /// For reads the visibility predicate is applied to `resource` itself, so
    /// an instance outside the actor's filter is denied like any other
    /// forbidden access.
    pub fn authorize_instance(
        &self,
        actor: &Actor,
        action: &Action,
        resource: &ResourceDescriptor,
    ) -> PolicyResult<()> {
        match self.authorize(actor, action, resource)? {
            Some(predicate) if !predicate.matches(resource) => {
                tracing::debug!(
                    role = %actor.role,
                    resource_type = %resource.resource_type,
                    "instance outside visibility filter"
                );
                Err(PolicyError::PolicyDenied {
                    reason: DenialReason::NotVisible,
                })
            }
            _ => Ok(()),
        }
    }
}

impl From<PolicyTable> for PolicyEvaluator {
    fn from(table: PolicyTable) -> Self {
        Self::new(table)
    }
}
