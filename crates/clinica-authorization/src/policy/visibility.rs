//! Read visibility predicates
//!
//! A read decision carries a predicate the caller's query layer ANDs into its
//! filter. The same predicate can be applied to a single descriptor with
//! [`VisibilityPredicate::matches`].

use crate::resource::ResourceDescriptor;
use clinica_core::{IdentityId, LifecycleState, ScopeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Row-level filter attached to an allowed read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VisibilityPredicate {
    /// No filter
    Unrestricted,
    /// `ownerScopeId == scope`
    OwnerScope(ScopeId),
    /// `ownerIdentity == identity`
    OwnerIdentity(IdentityId),
    /// `lifecycleState IN states`
    LifecycleIn(BTreeSet<LifecycleState>),
    /// Disjunction of the inner predicates
    AnyOf(Vec<VisibilityPredicate>),
}

impl VisibilityPredicate {
    /// Whether a concrete instance passes the filter
    ///
    /// Instances without a lifecycle state never match a lifecycle filter.
    pub fn matches(&self, resource: &ResourceDescriptor) -> bool {
        match self {
            VisibilityPredicate::Unrestricted => true,
            VisibilityPredicate::OwnerScope(scope) => resource.owner.scope() == Some(scope),
            VisibilityPredicate::OwnerIdentity(identity) => {
                resource.owner.identity() == Some(identity)
            }
            VisibilityPredicate::LifecycleIn(states) => resource
                .lifecycle_state
                .as_ref()
                .is_some_and(|state| states.contains(state)),
            VisibilityPredicate::AnyOf(inner) => inner.iter().any(|p| p.matches(resource)),
        }
    }

    /// Whether the predicate filters nothing out
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, VisibilityPredicate::Unrestricted)
    }

    /// OR together predicates granted by several rules
    ///
    /// Returns `None` when nothing was granted. `Unrestricted` absorbs
    /// everything, lifecycle sets are unioned, duplicates are dropped and a
    /// single remaining predicate is returned unwrapped.
    pub fn any_of<I>(predicates: I) -> Option<VisibilityPredicate>
    where
        I: IntoIterator<Item = VisibilityPredicate>,
    {
        let mut states: Option<BTreeSet<LifecycleState>> = None;
        let mut others: Vec<VisibilityPredicate> = Vec::new();
        let mut pending: Vec<VisibilityPredicate> = predicates.into_iter().collect();

        while let Some(predicate) = pending.pop() {
            match predicate {
                VisibilityPredicate::Unrestricted => return Some(VisibilityPredicate::Unrestricted),
                VisibilityPredicate::AnyOf(inner) => pending.extend(inner),
                VisibilityPredicate::LifecycleIn(set) => {
                    states.get_or_insert_with(BTreeSet::new).extend(set);
                }
                other => {
                    if !others.contains(&other) {
                        others.push(other);
                    }
                }
            }
        }

        // Keep a stable order: lifecycle first, then ownership clauses
        others.reverse();
        let mut clauses: Vec<VisibilityPredicate> = states
            .map(VisibilityPredicate::LifecycleIn)
            .into_iter()
            .collect();
        clauses.extend(others);

        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(VisibilityPredicate::AnyOf(clauses)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(values: &[&str]) -> BTreeSet<LifecycleState> {
        values.iter().copied().map(LifecycleState::from).collect()
    }

    #[test]
    fn lifecycle_filter_requires_known_state() {
        let predicate = VisibilityPredicate::LifecycleIn(states(&["approved"]));
        let approved = ResourceDescriptor::new("clinics").in_state("approved");
        let draft = ResourceDescriptor::new("clinics").in_state("draft");
        let unknown = ResourceDescriptor::new("clinics");

        assert!(predicate.matches(&approved));
        assert!(!predicate.matches(&draft));
        assert!(!predicate.matches(&unknown));
    }

    #[test]
    fn owner_filters_compare_the_right_dimension() {
        let scoped = ResourceDescriptor::new("doctors").owned_by_scope("clinic-1");
        assert!(VisibilityPredicate::OwnerScope("clinic-1".into()).matches(&scoped));
        assert!(!VisibilityPredicate::OwnerScope("clinic-2".into()).matches(&scoped));
        assert!(!VisibilityPredicate::OwnerIdentity("clinic-1".into()).matches(&scoped));
    }

    #[test]
    fn any_of_unions_lifecycle_sets() {
        let merged = VisibilityPredicate::any_of([
            VisibilityPredicate::LifecycleIn(states(&["approved"])),
            VisibilityPredicate::LifecycleIn(states(&["published"])),
        ]);
        assert_eq!(
            merged,
            Some(VisibilityPredicate::LifecycleIn(states(&["approved", "published"])))
        );
    }

    #[test]
    fn any_of_is_absorbed_by_unrestricted() {
        let merged = VisibilityPredicate::any_of([
            VisibilityPredicate::OwnerScope("clinic-1".into()),
            VisibilityPredicate::Unrestricted,
        ]);
        assert_eq!(merged, Some(VisibilityPredicate::Unrestricted));
    }

    #[test]
    fn any_of_keeps_ownership_clauses_and_flattens() {
        let merged = VisibilityPredicate::any_of([
            VisibilityPredicate::LifecycleIn(states(&["approved"])),
            VisibilityPredicate::AnyOf(vec![
                VisibilityPredicate::OwnerScope("clinic-1".into()),
                VisibilityPredicate::OwnerScope("clinic-1".into()),
            ]),
        ])
        .unwrap();

        assert_eq!(
            merged,
            VisibilityPredicate::AnyOf(vec![
                VisibilityPredicate::LifecycleIn(states(&["approved"])),
                VisibilityPredicate::OwnerScope("clinic-1".into()),
            ])
        );

        let draft_of_own = ResourceDescriptor::new("clinics")
            .owned_by_scope("clinic-1")
            .in_state("draft");
        assert!(merged.matches(&draft_of_own));
    }

    #[test]
    fn any_of_nothing_grants_nothing() {
        assert_eq!(VisibilityPredicate::any_of(Vec::new()), None);
    }
}
