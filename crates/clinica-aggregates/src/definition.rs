//! Aggregate definitions
//!
//! A definition says which children count toward which parent field and how
//! their values combine. Definitions are static configuration.

use crate::record::ChildRecord;
use clinica_core::{ConfigValidator, FieldName, LifecycleState, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Combining function over qualifying values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    /// Arithmetic mean
    #[default]
    Mean,
    /// Sum
    Sum,
    /// Smallest value
    Min,
    /// Largest value
    Max,
}

impl AggregateFn {
    /// Apply to `values`, `None` for an empty set
    ///
    /// An empty set has no aggregate; it is never reported as zero.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let result = match self {
            AggregateFn::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggregateFn::Sum => values.iter().sum(),
            AggregateFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        Some(result)
    }
}

/// Predicate selecting the children that count toward an aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualifyingPredicate {
    /// Every child counts
    #[default]
    Always,
    /// Child lifecycle state is one of `states`
    LifecycleIn {
        /// Qualifying states
        states: BTreeSet<LifecycleState>,
    },
    /// Child field equals `value`
    FieldEquals {
        /// Field to compare
        field: String,
        /// Expected value
        value: Value,
    },
    /// Every inner predicate holds
    All {
        /// Conjuncts
        predicates: Vec<QualifyingPredicate>,
    },
}

impl QualifyingPredicate {
    /// `lifecycleState IN states`
    pub fn lifecycle_in<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<LifecycleState>,
    {
        QualifyingPredicate::LifecycleIn {
            states: states.into_iter().map(Into::into).collect(),
        }
    }

    /// `field == value`
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        QualifyingPredicate::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether `record` counts
    pub fn matches(&self, record: &ChildRecord) -> bool {
        match self {
            QualifyingPredicate::Always => true,
            QualifyingPredicate::LifecycleIn { states } => record
                .lifecycle_state
                .as_ref()
                .is_some_and(|state| states.contains(state)),
            QualifyingPredicate::FieldEquals { field, value } => record.field(field) == Some(value),
            QualifyingPredicate::All { predicates } => predicates.iter().all(|p| p.matches(record)),
        }
    }

    fn check(&self, validator: &mut ConfigValidator) {
        match self {
            QualifyingPredicate::Always => {}
            QualifyingPredicate::LifecycleIn { states } => {
                validator.check(
                    "qualifying_predicate.states",
                    !states.is_empty(),
                    "an empty state set never qualifies",
                );
            }
            QualifyingPredicate::FieldEquals { field, .. } => {
                validator.non_empty("qualifying_predicate.field", field);
            }
            QualifyingPredicate::All { predicates } => {
                for predicate in predicates {
                    predicate.check(validator);
                }
            }
        }
    }
}

/// One derived field: `parent.target_field = aggregate_fn(children.value_field)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDefinition {
    /// Resource type holding the aggregate
    pub parent_type: ResourceType,
    /// Resource type of the contributing children
    pub child_type: ResourceType,
    /// Relation field on the child pointing at its parent
    pub parent_field: String,
    /// Which children count
    #[serde(default)]
    pub qualifying_predicate: QualifyingPredicate,
    /// Numeric field on the child
    pub value_field: String,
    /// Combining function
    #[serde(default)]
    pub aggregate_fn: AggregateFn,
    /// Field on the parent receiving the result
    pub target_field: FieldName,
}

impl AggregateDefinition {
    /// Mean over every child, refine with [`Self::qualifying`]
    pub fn mean(
        parent_type: impl Into<ResourceType>,
        child_type: impl Into<ResourceType>,
        parent_field: impl Into<String>,
        value_field: impl Into<String>,
        target_field: impl Into<FieldName>,
    ) -> Self {
        Self {
            parent_type: parent_type.into(),
            child_type: child_type.into(),
            parent_field: parent_field.into(),
            qualifying_predicate: QualifyingPredicate::Always,
            value_field: value_field.into(),
            aggregate_fn: AggregateFn::Mean,
            target_field: target_field.into(),
        }
    }

    /// Restrict which children count
    pub fn qualifying(mut self, predicate: QualifyingPredicate) -> Self {
        self.qualifying_predicate = predicate;
        self
    }

    /// Use a different combining function
    pub fn with_fn(mut self, aggregate_fn: AggregateFn) -> Self {
        self.aggregate_fn = aggregate_fn;
        self
    }

    /// Aggregate over the qualifying `children` of one parent
    ///
    /// A value of zero counts like any other. Children without a numeric
    /// value cannot contribute and are skipped.
    pub fn compute(&self, children: &[ChildRecord]) -> Option<f64> {
        let values: Vec<f64> = children
            .iter()
            .filter_map(|child| {
                let value = child.number(&self.value_field);
                if value.is_none() {
                    tracing::warn!(
                        child_type = %self.child_type,
                        child = %child.key,
                        field = %self.value_field,
                        "qualifying child has no numeric value; skipped"
                    );
                }
                value
            })
            .collect();
        self.aggregate_fn.apply(&values)
    }

    pub(crate) fn check(&self, validator: &mut ConfigValidator) {
        validator
            .non_empty("parent_type", self.parent_type.as_str())
            .non_empty("child_type", self.child_type.as_str())
            .non_empty("parent_field", &self.parent_field)
            .non_empty("value_field", &self.value_field)
            .non_empty("target_field", self.target_field.as_str())
            .check(
                "value_field",
                self.value_field != self.parent_field,
                "value field cannot be the parent relation",
            );
        self.qualifying_predicate.check(validator);
    }
}

impl fmt::Display for AggregateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} <- {:?}({}.{})",
            self.parent_type,
            self.target_field,
            self.aggregate_fn,
            self.child_type,
            self.value_field
        )
    }
}
