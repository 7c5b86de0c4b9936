//! What is being acted on
//!
//! A [`ResourceDescriptor`] is built by the transport layer from the stored
//! record (never from client input) and describes type, ownership, lifecycle
//! state and the fields a write touches.

use clinica_core::{FieldName, IdentityId, LifecycleState, ResourceType, ScopeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Verb requested by the actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum Action {
    /// Create a new instance
    Create,
    /// Read or list instances
    Read,
    /// Update an existing instance
    Update,
    /// Delete an instance
    Delete,
    /// Read a single field
    ReadField(FieldName),
    /// Write a single field
    WriteField(FieldName),
}

/// Payload-free action discriminant used to key policy rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// See [`Action::Create`]
    Create,
    /// See [`Action::Read`]
    Read,
    /// See [`Action::Update`]
    Update,
    /// See [`Action::Delete`]
    Delete,
    /// See [`Action::ReadField`]
    ReadField,
    /// See [`Action::WriteField`]
    WriteField,
}

impl Action {
    /// Discriminant used for rule lookup
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create => ActionKind::Create,
            Action::Read => ActionKind::Read,
            Action::Update => ActionKind::Update,
            Action::Delete => ActionKind::Delete,
            Action::ReadField(_) => ActionKind::ReadField,
            Action::WriteField(_) => ActionKind::WriteField,
        }
    }

    /// Whether this action writes field values
    pub fn is_write(&self) -> bool {
        matches!(self, Action::Create | Action::Update | Action::WriteField(_))
    }

    /// Fields written by this action against `resource`
    pub fn written_fields<'a>(
        &'a self,
        resource: &'a ResourceDescriptor,
    ) -> impl Iterator<Item = &'a FieldName> + 'a {
        let explicit = match self {
            Action::WriteField(field) => Some(field),
            _ => None,
        };
        let touched = self
            .is_write()
            .then(|| resource.touched_fields.iter())
            .into_iter()
            .flatten();
        explicit.into_iter().chain(touched)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Read => f.write_str("read"),
            Action::Update => f.write_str("update"),
            Action::Delete => f.write_str("delete"),
            Action::ReadField(field) => write!(f, "read_field({field})"),
            Action::WriteField(field) => write!(f, "write_field({field})"),
        }
    }
}

impl ActionKind {
    /// Whether decisions for this action carry a visibility filter
    pub fn is_read(self) -> bool {
        matches!(self, ActionKind::Read | ActionKind::ReadField)
    }
}

/// Ownership dimension of a resource instance
///
/// Exactly one dimension applies per instance, so scope and identity
/// ownership can never be claimed simultaneously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Ownership {
    /// Global resource with no owner
    #[default]
    Global,
    /// Owned by an organizational unit
    Scope(ScopeId),
    /// Owned by an individual account
    Identity(IdentityId),
}

impl Ownership {
    /// Owning scope, if scope-owned
    pub fn scope(&self) -> Option<&ScopeId> {
        match self {
            Ownership::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    /// Owning identity, if personally owned
    pub fn identity(&self) -> Option<&IdentityId> {
        match self {
            Ownership::Identity(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Structured metadata about the target of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource type tag
    pub resource_type: ResourceType,
    /// Who owns the instance
    #[serde(default)]
    pub owner: Ownership,
    /// Current lifecycle state, read from storage
    #[serde(default)]
    pub lifecycle_state: Option<LifecycleState>,
    /// Fields written by the request; empty for reads and deletes
    #[serde(default)]
    pub touched_fields: BTreeSet<FieldName>,
}

/// Reasons a descriptor is malformed for the requested action
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceInvariantError {
    /// Resource type tag is blank
    #[error("resource type is empty")]
    EmptyResourceType,
    /// Reads and deletes do not write fields
    #[error("{action} request touches fields {fields:?}")]
    FieldsOnNonWrite {
        /// Requested action
        action: String,
        /// Fields listed on the descriptor
        fields: Vec<String>,
    },
}

impl ResourceDescriptor {
    /// Descriptor for a global resource of `resource_type`
    pub fn new(resource_type: impl Into<ResourceType>) -> Self {
        Self {
            resource_type: resource_type.into(),
            owner: Ownership::Global,
            lifecycle_state: None,
            touched_fields: BTreeSet::new(),
        }
    }

    /// Set the owning scope
    pub fn owned_by_scope(mut self, scope: impl Into<ScopeId>) -> Self {
        self.owner = Ownership::Scope(scope.into());
        self
    }

    /// Set the owning identity
    pub fn owned_by_identity(mut self, identity: impl Into<IdentityId>) -> Self {
        self.owner = Ownership::Identity(identity.into());
        self
    }

    /// Set the current lifecycle state
    pub fn in_state(mut self, state: impl Into<LifecycleState>) -> Self {
        self.lifecycle_state = Some(state.into());
        self
    }

    /// Add fields written by the request
    pub fn touching<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldName>,
    {
        self.touched_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Check the descriptor is coherent with `action`
    pub fn validate_for(&self, action: &Action) -> Result<(), ResourceInvariantError> {
        if self.resource_type.as_str().trim().is_empty() {
            return Err(ResourceInvariantError::EmptyResourceType);
        }
        if !action.is_write() && !self.touched_fields.is_empty() {
            return Err(ResourceInvariantError::FieldsOnNonWrite {
                action: action.to_string(),
                fields: self
                    .touched_fields
                    .iter()
                    .map(|f| f.as_str().to_string())
                    .collect(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_fields_cover_explicit_and_touched() {
        let resource = ResourceDescriptor::new("reviews").touching(["comment"]);
        let action = Action::WriteField(FieldName::new("status"));
        let fields: Vec<&str> = action.written_fields(&resource).map(|f| f.as_str()).collect();
        assert_eq!(fields, vec!["status", "comment"]);

        let fields: Vec<&FieldName> = Action::Read.written_fields(&resource).collect();
        assert!(fields.is_empty());
    }

    #[test]
    fn reads_with_touched_fields_are_malformed() {
        let resource = ResourceDescriptor::new("clinics").touching(["name"]);
        assert!(matches!(
            resource.validate_for(&Action::Read),
            Err(ResourceInvariantError::FieldsOnNonWrite { .. })
        ));
        assert!(resource.validate_for(&Action::Update).is_ok());
    }

    #[test]
    fn blank_resource_type_is_malformed() {
        let resource = ResourceDescriptor::new("  ");
        assert_eq!(
            resource.validate_for(&Action::Read),
            Err(ResourceInvariantError::EmptyResourceType)
        );
    }

    #[test]
    fn ownership_accessors_are_exclusive() {
        let scoped = ResourceDescriptor::new("doctors").owned_by_scope("clinic-1");
        assert_eq!(scoped.owner.scope(), Some(&ScopeId::new("clinic-1")));
        assert_eq!(scoped.owner.identity(), None);

        // Setting identity replaces the scope dimension
        let personal = scoped.owned_by_identity("patient-1");
        assert_eq!(personal.owner.scope(), None);
        assert_eq!(personal.owner.identity(), Some(&IdentityId::new("patient-1")));
    }
}
