//! Child records, parent keys and change events
//!
//! Records are schemaless: besides their key and lifecycle state they carry a
//! JSON field map, so one engine serves every resource type.

use crate::definition::AggregateDefinition;
use clinica_core::{LifecycleState, RecordKey, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of one parent instance, the unit of recompute serialization
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentKey {
    /// Parent resource type
    pub parent_type: ResourceType,
    /// Parent record key
    pub key: RecordKey,
}

impl ParentKey {
    /// Build a key
    pub fn new(parent_type: impl Into<ResourceType>, key: impl Into<RecordKey>) -> Self {
        Self {
            parent_type: parent_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.parent_type, self.key)
    }
}

/// A stored child record as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRecord {
    /// Record key
    pub key: RecordKey,
    /// Resource type of the record
    pub child_type: ResourceType,
    /// Lifecycle state, when the type has one
    #[serde(default)]
    pub lifecycle_state: Option<LifecycleState>,
    /// Remaining fields, including parent references and numeric values
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl ChildRecord {
    /// Record with no fields
    pub fn new(child_type: impl Into<ResourceType>, key: impl Into<RecordKey>) -> Self {
        Self {
            key: key.into(),
            child_type: child_type.into(),
            lifecycle_state: None,
            fields: BTreeMap::new(),
        }
    }

    /// Set the lifecycle state
    pub fn in_state(mut self, state: impl Into<LifecycleState>) -> Self {
        self.lifecycle_state = Some(state.into());
        self
    }

    /// Set a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Raw field value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Numeric value of a field, `None` when absent or not a number
    pub fn number(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(Value::as_f64)
    }

    /// Key referenced by a relation field
    ///
    /// Relations are stored either as a bare id (string or integer) or as an
    /// embedded object carrying an `id`.
    pub fn reference(&self, name: &str) -> Option<RecordKey> {
        match self.field(name)? {
            Value::String(id) if !id.is_empty() => Some(RecordKey::new(id.as_str())),
            Value::Number(id) => Some(RecordKey::new(id.to_string())),
            Value::Object(embedded) => match embedded.get("id")? {
                Value::String(id) if !id.is_empty() => Some(RecordKey::new(id.as_str())),
                Value::Number(id) => Some(RecordKey::new(id.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Kind of committed child mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Record created
    Insert,
    /// Record edited
    Update,
    /// Record removed
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => f.write_str("insert"),
            ChangeKind::Update => f.write_str("update"),
            ChangeKind::Delete => f.write_str("delete"),
        }
    }
}

/// Notification that a child mutation has committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildChangeEvent {
    /// What happened
    pub kind: ChangeKind,
    /// Resource type of the child
    pub child_type: ResourceType,
    /// Record before the change, absent for inserts
    pub before: Option<ChildRecord>,
    /// Record after the change, absent for deletes
    pub after: Option<ChildRecord>,
}

impl ChildChangeEvent {
    /// A record was created
    pub fn inserted(record: ChildRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            child_type: record.child_type.clone(),
            before: None,
            after: Some(record),
        }
    }

    /// A record was edited
    pub fn updated(before: ChildRecord, after: ChildRecord) -> Self {
        Self {
            kind: ChangeKind::Update,
            child_type: after.child_type.clone(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// A record was removed
    pub fn deleted(record: ChildRecord) -> Self {
        Self {
            kind: ChangeKind::Delete,
            child_type: record.child_type.clone(),
            before: Some(record),
            after: None,
        }
    }

    /// Check the before/after images are consistent with the kind
    pub fn validate(&self) -> Result<(), String> {
        let (expects_before, expects_after) = match self.kind {
            ChangeKind::Insert => (false, true),
            ChangeKind::Update => (true, true),
            ChangeKind::Delete => (true, false),
        };
        if self.before.is_some() != expects_before || self.after.is_some() != expects_after {
            return Err(format!(
                "{} event has before={} after={}",
                self.kind,
                self.before.is_some(),
                self.after.is_some()
            ));
        }
        for record in self.before.iter().chain(self.after.iter()) {
            if record.child_type != self.child_type {
                return Err(format!(
                    "{} record in {} event",
                    record.child_type, self.child_type
                ));
            }
        }
        if let (Some(before), Some(after)) = (&self.before, &self.after) {
            if before.key != after.key {
                return Err(format!("update changes record key {} to {}", before.key, after.key));
            }
        }
        Ok(())
    }

    /// Parent referenced before the change
    pub fn parent_key_before(&self, definition: &AggregateDefinition) -> Option<RecordKey> {
        self.before
            .as_ref()
            .and_then(|r| r.reference(&definition.parent_field))
    }

    /// Parent referenced after the change
    pub fn parent_key_after(&self, definition: &AggregateDefinition) -> Option<RecordKey> {
        self.after
            .as_ref()
            .and_then(|r| r.reference(&definition.parent_field))
    }

    /// Whether either image counts toward `definition`
    ///
    /// When neither does, no parent's qualifying set changed.
    pub fn touches(&self, definition: &AggregateDefinition) -> bool {
        self.before
            .iter()
            .chain(self.after.iter())
            .any(|record| definition.qualifying_predicate.matches(record))
    }

    /// Parents whose `definition` aggregate may have changed
    ///
    /// Yields both the old and the new parent when a relation was edited.
    pub fn affected_parents(&self, definition: &AggregateDefinition) -> Vec<ParentKey> {
        if !self.touches(definition) {
            return Vec::new();
        }

        let mut keys = Vec::with_capacity(2);
        for key in [
            self.parent_key_before(definition),
            self.parent_key_after(definition),
        ]
        .into_iter()
        .flatten()
        {
            let parent = ParentKey::new(definition.parent_type.clone(), key);
            if !keys.contains(&parent) {
                keys.push(parent);
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::QualifyingPredicate;
    use serde_json::json;

    fn rating_definition() -> AggregateDefinition {
        AggregateDefinition::mean("clinics", "reviews", "clinic", "starRating", "averageRating")
            .qualifying(QualifyingPredicate::lifecycle_in(["approved"]))
    }

    fn review(key: &str, clinic: &str, state: &str) -> ChildRecord {
        ChildRecord::new("reviews", key)
            .in_state(state)
            .with_field("clinic", clinic)
            .with_field("starRating", 4)
    }

    #[test]
    fn references_accept_ids_and_embedded_objects() {
        let record = ChildRecord::new("reviews", "r1")
            .with_field("clinic", json!({ "id": 17, "name": "North" }))
            .with_field("doctor", "d-9")
            .with_field("treatment", json!(null));

        assert_eq!(record.reference("clinic"), Some(RecordKey::new("17")));
        assert_eq!(record.reference("doctor"), Some(RecordKey::new("d-9")));
        assert_eq!(record.reference("treatment"), None);
        assert_eq!(record.reference("missing"), None);
    }

    #[test]
    fn reattribution_affects_both_parents() {
        let event = ChildChangeEvent::updated(
            review("r1", "c1", "approved"),
            review("r1", "c2", "approved"),
        );
        assert_eq!(
            event.affected_parents(&rating_definition()),
            vec![ParentKey::new("clinics", "c1"), ParentKey::new("clinics", "c2")]
        );
    }

    #[test]
    fn approval_affects_the_parent_once() {
        let event = ChildChangeEvent::updated(
            review("r1", "c1", "pending"),
            review("r1", "c1", "approved"),
        );
        assert_eq!(
            event.affected_parents(&rating_definition()),
            vec![ParentKey::new("clinics", "c1")]
        );
    }

    #[test]
    fn non_qualifying_changes_affect_nothing() {
        let event = ChildChangeEvent::inserted(review("r1", "c1", "pending"));
        assert!(event.affected_parents(&rating_definition()).is_empty());
    }

    #[test]
    fn inconsistent_events_are_rejected() {
        let mut event = ChildChangeEvent::inserted(review("r1", "c1", "approved"));
        event.before = Some(review("r1", "c1", "approved"));
        assert!(event.validate().is_err());

        let event = ChildChangeEvent::updated(
            review("r1", "c1", "approved"),
            review("r2", "c1", "approved"),
        );
        assert!(event.validate().is_err());

        let mut event = ChildChangeEvent::deleted(review("r1", "c1", "approved"));
        event.child_type = "clinictreatments".into();
        assert!(event.validate().is_err());
    }
}
