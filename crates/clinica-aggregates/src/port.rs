//! Persistence port
//!
//! The engine's only view of storage. Implementations apply the qualifying
//! predicate in their own query language, commit aggregate values, and
//! deliver change events after each child mutation commits.

use crate::definition::{AggregateDefinition, QualifyingPredicate};
use crate::errors::{AggregateError, PersistenceError};
use crate::record::{ChildChangeEvent, ChildRecord, ParentKey};
use async_trait::async_trait;
use clinica_core::{FieldName, ResourceType};
use std::sync::Arc;

/// Query for the qualifying children of one parent
#[derive(Debug, Clone, Copy)]
pub struct ChildQuery<'a> {
    /// Parent whose children are wanted
    pub parent: &'a ParentKey,
    /// Child resource type
    pub child_type: &'a ResourceType,
    /// Relation field on the child that must equal `parent.key`
    pub parent_field: &'a str,
    /// Predicate every returned child must satisfy
    pub predicate: &'a QualifyingPredicate,
}

impl<'a> ChildQuery<'a> {
    /// Query for `definition` under `parent`
    pub fn for_definition(definition: &'a AggregateDefinition, parent: &'a ParentKey) -> Self {
        Self {
            parent,
            child_type: &definition.child_type,
            parent_field: &definition.parent_field,
            predicate: &definition.qualifying_predicate,
        }
    }

    /// Whether `record` belongs in the result
    pub fn matches(&self, record: &ChildRecord) -> bool {
        &record.child_type == self.child_type
            && record.reference(self.parent_field).as_ref() == Some(&self.parent.key)
            && self.predicate.matches(record)
    }
}

/// Receiver of committed child changes
#[async_trait]
pub trait ChildChangeHandler: Send + Sync {
    /// Handle one committed change
    ///
    /// An error is returned to whoever committed the child mutation.
    async fn handle(&self, event: ChildChangeEvent) -> Result<(), AggregateError>;
}

/// Storage operations the aggregate engine depends on
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Every child matching `query`
    async fn find_qualifying_children(
        &self,
        query: ChildQuery<'_>,
    ) -> Result<Vec<ChildRecord>, PersistenceError>;

    /// Store `value` in `parent.field`; `None` clears the field
    async fn write_aggregate(
        &self,
        parent: &ParentKey,
        field: &FieldName,
        value: Option<f64>,
    ) -> Result<(), PersistenceError>;

    /// Deliver every committed change of `child_type` to `handler`
    async fn subscribe(
        &self,
        child_type: &ResourceType,
        handler: Arc<dyn ChildChangeHandler>,
    ) -> Result<(), PersistenceError>;
}
