//! Registry of aggregate definitions
//!
//! The registry indexes definitions by child type (event routing) and by
//! parent type (recompute and reconciliation), and records which parent
//! fields are engine-owned.

use crate::definition::{AggregateDefinition, QualifyingPredicate};
use crate::errors::{AggregateError, AggregateResult};
use clinica_core::{ConfigValidation, ConfigValidator, FieldName, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Serialized form of a registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateDocument {
    /// All definitions
    #[serde(default)]
    pub aggregates: Vec<AggregateDefinition>,
}

impl ConfigValidation for AggregateDocument {
    fn validate(&self) -> Result<(), clinica_core::ClinicaError> {
        let root = ConfigValidator::new();
        let mut validator = ConfigValidator::new();
        let mut targets = BTreeSet::new();

        for (index, definition) in self.aggregates.iter().enumerate() {
            let mut nested = root.for_field(&format!("aggregates[{index}]"));
            definition.check(&mut nested);
            nested.check(
                "target_field",
                targets.insert((&definition.parent_type, &definition.target_field)),
                "another aggregate already writes this parent field",
            );
            validator.merge(nested);
        }
        Ok(validator.result()?)
    }
}

/// Immutable, validated set of aggregate definitions
#[derive(Debug, Clone, Default)]
pub struct AggregateRegistry {
    definitions: Vec<Arc<AggregateDefinition>>,
    by_child: BTreeMap<ResourceType, Vec<usize>>,
    by_parent: BTreeMap<ResourceType, Vec<usize>>,
}

impl AggregateRegistry {
    /// Validate and index `definitions`
    pub fn new(
        definitions: impl IntoIterator<Item = AggregateDefinition>,
    ) -> AggregateResult<Self> {
        Self::from_document(AggregateDocument {
            aggregates: definitions.into_iter().collect(),
        })
    }

    /// Validate and index a parsed document
    pub fn from_document(document: AggregateDocument) -> AggregateResult<Self> {
        document.validate()?;

        let mut registry = Self::default();
        for (index, definition) in document.aggregates.into_iter().enumerate() {
            registry
                .by_child
                .entry(definition.child_type.clone())
                .or_default()
                .push(index);
            registry
                .by_parent
                .entry(definition.parent_type.clone())
                .or_default()
                .push(index);
            registry.definitions.push(Arc::new(definition));
        }
        tracing::debug!(definitions = registry.definitions.len(), "aggregate registry loaded");
        Ok(registry)
    }

    /// Parse a TOML document with `[[aggregates]]` entries
    pub fn from_toml_str(content: &str) -> AggregateResult<Self> {
        let document: AggregateDocument = clinica_core::parse_toml(content)?;
        Self::from_document(document)
    }

    /// Load a TOML registry file
    pub fn load(path: &Path) -> AggregateResult<Self> {
        let document: AggregateDocument = clinica_core::load_toml(path)?;
        Self::from_document(document)
    }

    /// Every definition
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<AggregateDefinition>> {
        self.definitions.iter()
    }

    /// Definitions fed by `child_type`
    pub fn definitions_for_child<'a>(
        &'a self,
        child_type: &ResourceType,
    ) -> impl Iterator<Item = &'a Arc<AggregateDefinition>> + 'a {
        self.indexed(self.by_child.get(child_type))
    }

    /// Definitions stored on `parent_type`
    pub fn definitions_for_parent<'a>(
        &'a self,
        parent_type: &ResourceType,
    ) -> impl Iterator<Item = &'a Arc<AggregateDefinition>> + 'a {
        self.indexed(self.by_parent.get(parent_type))
    }

    /// The definition writing `parent_type.target_field`
    pub fn definition(
        &self,
        parent_type: &ResourceType,
        target_field: &FieldName,
    ) -> Option<&Arc<AggregateDefinition>> {
        self.definitions_for_parent(parent_type)
            .find(|d| &d.target_field == target_field)
    }

    /// Child types the engine must subscribe to
    pub fn child_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.by_child.keys()
    }

    /// Whether `parent_type.field` is engine-owned
    pub fn is_reserved(&self, parent_type: &ResourceType, field: &FieldName) -> bool {
        self.definition(parent_type, field).is_some()
    }

    /// Reject a write to a parent that touches engine-owned fields
    ///
    /// The persistence layer calls this for every write that does not come
    /// from the engine itself.
    pub fn guard_parent_write<'f>(
        &self,
        parent_type: &ResourceType,
        fields: impl IntoIterator<Item = &'f FieldName>,
    ) -> AggregateResult<()> {
        for field in fields {
            if self.is_reserved(parent_type, field) {
                tracing::warn!(%parent_type, %field, "rejected external write to aggregate field");
                return Err(AggregateError::ReservedField {
                    parent_type: parent_type.clone(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn indexed<'a>(
        &'a self,
        indices: Option<&'a Vec<usize>>,
    ) -> impl Iterator<Item = &'a Arc<AggregateDefinition>> + 'a {
        indices
            .into_iter()
            .flatten()
            .filter_map(|&index| self.definitions.get(index))
    }
}

/// Derived fields of the clinic directory
///
/// - `treatments.averagePrice`: mean price over every clinic offering it
/// - `clinics`, `doctors`, `treatments` `.averageRating`: mean star rating
///   over approved reviews
pub fn clinic_directory_aggregates() -> AggregateResult<AggregateRegistry> {
    let approved = QualifyingPredicate::lifecycle_in(["approved"]);
    AggregateRegistry::new([
        AggregateDefinition::mean(
            "treatments",
            "clinictreatments",
            "treatment",
            "price",
            "averagePrice",
        ),
        AggregateDefinition::mean("clinics", "reviews", "clinic", "starRating", "averageRating")
            .qualifying(approved.clone()),
        AggregateDefinition::mean("doctors", "reviews", "doctor", "starRating", "averageRating")
            .qualifying(approved.clone()),
        AggregateDefinition::mean(
            "treatments",
            "reviews",
            "treatment",
            "starRating",
            "averageRating",
        )
        .qualifying(approved),
    ])
}
