//! Policy evaluation logic
//!
//! [`evaluate`] is the single interpreter for the rule table. It is a pure
//! function of its inputs; the only side effect is tracing.
//!
//! Order of checks:
//! 1. malformed actor or descriptor → deny
//! 2. unconfigured resource type, or no rule for the action → deny; field
//!    actions need rules of their own
//! 3. immutable fields on updates → deny (every role)
//! 4. administrator → allow
//! 5. restricted fields → deny (non-administrators)
//! 6. role grant, then scope/identity ownership per rule; any passing rule
//!    allows, reads OR together the visibility of every granting rule

use crate::actor::{Actor, Role};
use crate::policy::rules::{PolicyRule, PolicyTable};
use crate::policy::visibility::VisibilityPredicate;
use crate::resource::{Action, ActionKind, ResourceDescriptor};
use clinica_core::FieldName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of policy evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Access is allowed
    Allow,
    /// Access is denied
    Deny(DenialReason),
    /// Read access is allowed for instances matching the predicate
    AllowWithFilter(VisibilityPredicate),
}

impl Decision {
    /// Whether the decision grants anything
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny(_))
    }

    /// Visibility predicate of a read grant
    pub fn filter(&self) -> Option<&VisibilityPredicate> {
        match self {
            Decision::AllowWithFilter(predicate) => Some(predicate),
            _ => None,
        }
    }
}

/// Why a request was denied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// No rule exists for the resource type at all
    UnconfiguredResourceType,
    /// The type is configured but not for this action
    NoRuleForAction,
    /// Actor or descriptor failed well-formedness checks
    InvariantViolation(String),
    /// A written field is administrator-only
    RestrictedField(FieldName),
    /// A written field is frozen after creation
    ImmutableField(FieldName),
    /// No rule grants the actor's role
    RoleNotPermitted,
    /// Scoped staff without an assigned scope
    UnassignedScope,
    /// Actor scope does not own the instance
    ScopeMismatch,
    /// Actor identity does not own the instance
    IdentityMismatch,
    /// Read granted, but the instance falls outside the visibility filter
    NotVisible,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::UnconfiguredResourceType => f.write_str("unconfigured resource type"),
            DenialReason::NoRuleForAction => f.write_str("no rule for action"),
            DenialReason::InvariantViolation(detail) => write!(f, "invariant violation: {detail}"),
            DenialReason::RestrictedField(field) => write!(f, "restricted field `{field}`"),
            DenialReason::ImmutableField(field) => write!(f, "immutable field `{field}`"),
            DenialReason::RoleNotPermitted => f.write_str("role not permitted"),
            DenialReason::UnassignedScope => f.write_str("staff actor has no assigned scope"),
            DenialReason::ScopeMismatch => f.write_str("scope mismatch"),
            DenialReason::IdentityMismatch => f.write_str("identity mismatch"),
            DenialReason::NotVisible => f.write_str("instance not visible"),
        }
    }
}

/// Evaluate whether `actor` may perform `action` on `resource`
pub fn evaluate(
    table: &PolicyTable,
    actor: &Actor,
    action: &Action,
    resource: &ResourceDescriptor,
) -> Decision {
    let decision = evaluate_inner(table, actor, action, resource);

    if let Decision::Deny(reason) = &decision {
        tracing::debug!(
            role = %actor.role,
            action = %action,
            resource_type = %resource.resource_type,
            %reason,
            "policy denied"
        );
    }
    decision
}

fn evaluate_inner(
    table: &PolicyTable,
    actor: &Actor,
    action: &Action,
    resource: &ResourceDescriptor,
) -> Decision {
    if let Err(violation) = actor.validate() {
        tracing::warn!(role = %actor.role, %violation, "malformed actor");
        return Decision::Deny(DenialReason::InvariantViolation(violation.to_string()));
    }
    if let Err(violation) = resource.validate_for(action) {
        tracing::warn!(
            resource_type = %resource.resource_type,
            %violation,
            "malformed resource descriptor"
        );
        return Decision::Deny(DenialReason::InvariantViolation(violation.to_string()));
    }

    let Some(type_policy) = table.resource(&resource.resource_type) else {
        tracing::error!(
            resource_type = %resource.resource_type,
            action = %action,
            "no policy rules registered for resource type; failing closed"
        );
        return Decision::Deny(DenialReason::UnconfiguredResourceType);
    };

    let kind = action.kind();
    let rules = type_policy.rules_for(kind);
    if rules.is_empty() {
        return Decision::Deny(DenialReason::NoRuleForAction);
    }

    if matches!(kind, ActionKind::Update | ActionKind::WriteField) {
        if let Some(field) = first_member(action, resource, type_policy.immutable_fields()) {
            return Decision::Deny(DenialReason::ImmutableField(field.clone()));
        }
    }

    if actor.is_administrator() {
        return if kind.is_read() {
            Decision::AllowWithFilter(VisibilityPredicate::Unrestricted)
        } else {
            Decision::Allow
        };
    }

    if let Some(field) = first_member(action, resource, type_policy.restricted_fields()) {
        return Decision::Deny(DenialReason::RestrictedField(field.clone()));
    }

    let granting: Vec<&PolicyRule> = rules.iter().filter(|r| r.grants_role(actor.role)).collect();
    if granting.is_empty() {
        return Decision::Deny(DenialReason::RoleNotPermitted);
    }

    if kind.is_read() {
        return evaluate_read(&granting, actor);
    }

    // Allow-overrides: the first rule whose ownership check passes wins
    let mut first_failure = None;
    for rule in granting {
        match check_ownership(rule, actor, resource) {
            Ok(()) => return Decision::Allow,
            Err(reason) => {
                first_failure.get_or_insert(reason);
            }
        }
    }
    Decision::Deny(first_failure.unwrap_or(DenialReason::RoleNotPermitted))
}

fn evaluate_read(granting: &[&PolicyRule], actor: &Actor) -> Decision {
    let mut first_failure = None;
    let mut predicates = Vec::with_capacity(granting.len());

    for rule in granting {
        match rule_visibility(rule, actor) {
            Ok(predicate) => predicates.push(predicate),
            Err(reason) => {
                first_failure.get_or_insert(reason);
            }
        }
    }

    match VisibilityPredicate::any_of(predicates) {
        Some(predicate) => Decision::AllowWithFilter(predicate),
        None => Decision::Deny(first_failure.unwrap_or(DenialReason::RoleNotPermitted)),
    }
}

/// Visibility one rule grants the actor on reads
fn rule_visibility(rule: &PolicyRule, actor: &Actor) -> Result<VisibilityPredicate, DenialReason> {
    if rule.requires_owner_scope_match {
        return actor
            .assigned_scope()
            .cloned()
            .map(VisibilityPredicate::OwnerScope)
            .ok_or_else(|| missing_scope_reason(actor));
    }
    if rule.requires_owner_identity_match {
        return actor
            .identity
            .clone()
            .map(VisibilityPredicate::OwnerIdentity)
            .ok_or(DenialReason::IdentityMismatch);
    }
    Ok(match rule.visible_lifecycle_states.get(&actor.role) {
        Some(states) => VisibilityPredicate::LifecycleIn(states.clone()),
        None => VisibilityPredicate::Unrestricted,
    })
}

/// Ownership checks for non-read actions
fn check_ownership(
    rule: &PolicyRule,
    actor: &Actor,
    resource: &ResourceDescriptor,
) -> Result<(), DenialReason> {
    if rule.requires_owner_scope_match {
        let scope = actor
            .assigned_scope()
            .ok_or_else(|| missing_scope_reason(actor))?;
        if resource.owner.scope() != Some(scope) {
            return Err(DenialReason::ScopeMismatch);
        }
    }
    if rule.requires_owner_identity_match {
        match (actor.identity.as_ref(), resource.owner.identity()) {
            (Some(actor_identity), Some(owner)) if actor_identity == owner => {}
            _ => return Err(DenialReason::IdentityMismatch),
        }
    }
    Ok(())
}

fn missing_scope_reason(actor: &Actor) -> DenialReason {
    if actor.role == Role::ScopedStaff {
        DenialReason::UnassignedScope
    } else {
        DenialReason::ScopeMismatch
    }
}

fn first_member<'a>(
    action: &'a Action,
    resource: &'a ResourceDescriptor,
    fields: &std::collections::BTreeSet<FieldName>,
) -> Option<&'a FieldName> {
    if fields.is_empty() {
        return None;
    }
    action
        .written_fields(resource)
        .find(|field| fields.contains(*field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PolicyTable {
        PolicyTable::new([
            PolicyRule::new("clinics", ActionKind::Read)
                .allow([Role::Anonymous, Role::Member, Role::ScopedStaff])
                .visible_to(Role::Anonymous, ["approved"])
                .visible_to(Role::Member, ["approved"])
                .visible_to(Role::ScopedStaff, ["approved"]),
            PolicyRule::new("clinics", ActionKind::Read)
                .allow([Role::ScopedStaff])
                .scoped(),
            PolicyRule::new("clinics", ActionKind::Update)
                .allow([Role::ScopedStaff])
                .scoped()
                .restrict(["status"]),
            PolicyRule::new("clinics", ActionKind::Create).allow([Role::Administrator]),
            PolicyRule::new("clinics", ActionKind::WriteField)
                .allow([Role::ScopedStaff])
                .scoped(),
            PolicyRule::new("favorites", ActionKind::Delete)
                .allow([Role::Member])
                .owner_only(),
            PolicyRule::new("gallery", ActionKind::Update)
                .allow([Role::ScopedStaff])
                .scoped()
                .immutable(["clinic"]),
        ])
        .unwrap()
    }

    fn clinic(scope: &str, state: &str) -> ResourceDescriptor {
        ResourceDescriptor::new("clinics")
            .owned_by_scope(scope)
            .in_state(state)
    }

    #[test]
    fn test_unconfigured_type_denies_administrator() {
        let decision = evaluate(
            &table(),
            &Actor::administrator("admin"),
            &Action::Read,
            &ResourceDescriptor::new("invoices"),
        );
        assert_eq!(decision, Decision::Deny(DenialReason::UnconfiguredResourceType));
    }

    #[test]
    fn test_missing_action_rule_denies_administrator() {
        let decision = evaluate(
            &table(),
            &Actor::administrator("admin"),
            &Action::Delete,
            &clinic("c1", "approved"),
        );
        assert_eq!(decision, Decision::Deny(DenialReason::NoRuleForAction));
    }

    #[test]
    fn test_staff_updates_own_clinic_only() {
        let staff = Actor::scoped_staff("s1", "c1");
        let own = clinic("c1", "draft").touching(["name"]);
        let other = clinic("c2", "draft").touching(["name"]);

        assert_eq!(evaluate(&table(), &staff, &Action::Update, &own), Decision::Allow);
        assert_eq!(
            evaluate(&table(), &staff, &Action::Update, &other),
            Decision::Deny(DenialReason::ScopeMismatch)
        );
    }

    #[test]
    fn test_restricted_field_overrides_scope_grant() {
        let staff = Actor::scoped_staff("s1", "c1");
        let own = clinic("c1", "draft").touching(["name", "status"]);
        assert_eq!(
            evaluate(&table(), &staff, &Action::Update, &own),
            Decision::Deny(DenialReason::RestrictedField("status".into()))
        );
        assert_eq!(
            evaluate(&table(), &Actor::administrator("a"), &Action::Update, &own),
            Decision::Allow
        );
    }

    #[test]
    fn test_unassigned_staff_is_zero_privilege() {
        let staff = Actor::unassigned_staff("s9");
        let own = clinic("c1", "draft").touching(["name"]);
        assert_eq!(
            evaluate(&table(), &staff, &Action::Update, &own),
            Decision::Deny(DenialReason::UnassignedScope)
        );

        // Still sees what the public sees, nothing more
        let read = evaluate(&table(), &staff, &Action::Read, &ResourceDescriptor::new("clinics"));
        assert_eq!(
            read,
            Decision::AllowWithFilter(VisibilityPredicate::LifecycleIn(
                ["approved".into()].into_iter().collect()
            ))
        );
    }

    #[test]
    fn test_identity_rule_requires_matching_owner() {
        let patient = Actor::member("p1");
        let own = ResourceDescriptor::new("favorites").owned_by_identity("p1");
        let other = ResourceDescriptor::new("favorites").owned_by_identity("p2");

        assert_eq!(evaluate(&table(), &patient, &Action::Delete, &own), Decision::Allow);
        assert_eq!(
            evaluate(&table(), &patient, &Action::Delete, &other),
            Decision::Deny(DenialReason::IdentityMismatch)
        );
    }

    #[test]
    fn test_immutable_field_denies_everyone() {
        let update = ResourceDescriptor::new("gallery")
            .owned_by_scope("c1")
            .touching(["clinic"]);
        assert_eq!(
            evaluate(&table(), &Actor::administrator("a"), &Action::Update, &update),
            Decision::Deny(DenialReason::ImmutableField("clinic".into()))
        );
    }

    #[test]
    fn test_role_without_grant_is_denied() {
        let decision = evaluate(
            &table(),
            &Actor::member("p1"),
            &Action::Update,
            &clinic("c1", "approved").touching(["name"]),
        );
        assert_eq!(decision, Decision::Deny(DenialReason::RoleNotPermitted));
    }

    #[test]
    fn test_malformed_actor_is_denied() {
        let mut actor = Actor::member("p1");
        actor.scope_id = Some("c1".into());
        let clinics = ResourceDescriptor::new("clinics");
        let decision = evaluate(&table(), &actor, &Action::Read, &clinics);
        assert!(matches!(decision, Decision::Deny(DenialReason::InvariantViolation(_))));
    }

    #[test]
    fn test_read_with_touched_fields_is_malformed() {
        let decision = evaluate(
            &table(),
            &Actor::administrator("a"),
            &Action::Read,
            &ResourceDescriptor::new("clinics").touching(["name"]),
        );
        assert!(matches!(decision, Decision::Deny(DenialReason::InvariantViolation(_))));
    }

    #[test]
    fn test_field_actions_need_their_own_rules() {
        let staff = Actor::scoped_staff("s1", "c1");
        let own = clinic("c1", "draft");

        // Update rules grant staff the whole record, but no ReadField rule exists
        assert_eq!(
            evaluate(&table(), &staff, &Action::ReadField("name".into()), &own),
            Decision::Deny(DenialReason::NoRuleForAction)
        );
        assert_eq!(
            evaluate(
                &table(),
                &Actor::administrator("a"),
                &Action::ReadField("name".into()),
                &own
            ),
            Decision::Deny(DenialReason::NoRuleForAction)
        );

        let gallery = ResourceDescriptor::new("gallery").owned_by_scope("c1");
        assert_eq!(
            evaluate(&table(), &staff, &Action::WriteField("title".into()), &gallery),
            Decision::Deny(DenialReason::NoRuleForAction)
        );
    }

    #[test]
    fn test_field_rules_apply_record_restrictions() {
        let staff = Actor::scoped_staff("s1", "c1");
        let own = clinic("c1", "draft");
        let other = clinic("c2", "draft");
        let name = Action::WriteField("name".into());

        assert_eq!(evaluate(&table(), &staff, &name, &own), Decision::Allow);
        assert_eq!(
            evaluate(&table(), &staff, &name, &other),
            Decision::Deny(DenialReason::ScopeMismatch)
        );
        assert_eq!(
            evaluate(&table(), &staff, &Action::WriteField("status".into()), &own),
            Decision::Deny(DenialReason::RestrictedField("status".into()))
        );
    }
}
