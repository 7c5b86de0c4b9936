//! Property tests for the policy evaluator
//!
//! Covers the evaluator invariants:
//! - deny-by-default for unconfigured resource types and actions
//! - scope isolation for scoped staff
//! - restricted fields override every non-administrator grant
//! - the clinic directory listing seen by each role

use clinica_authorization::{
    clinic_directory_policy, evaluate, Action, ActionKind, Actor, Decision, DenialReason,
    PolicyRule, PolicyTable, ResourceDescriptor, Role, VisibilityPredicate,
};
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scoped_table() -> PolicyTable {
    PolicyTable::new([
        PolicyRule::new("doctors", ActionKind::Update)
            .allow([Role::ScopedStaff])
            .scoped()
            .restrict(["averageRating", "verified"]),
        PolicyRule::new("doctors", ActionKind::Update).allow([Role::Member]),
        PolicyRule::new("doctors", ActionKind::Read).allow(Role::ALL),
    ])
    .unwrap()
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Anonymous),
        Just(Role::Member),
        Just(Role::ScopedStaff),
        Just(Role::Administrator),
    ]
}

fn arb_actor() -> impl Strategy<Value = Actor> {
    (arb_role(), "[a-c]", "[a-z]{1,6}", any::<bool>()).prop_map(|(role, scope, id, assigned)| {
        match role {
            Role::Anonymous => Actor::anonymous(),
            Role::Member => Actor::member(id),
            Role::ScopedStaff if assigned => Actor::scoped_staff(id, scope),
            Role::ScopedStaff => Actor::unassigned_staff(id),
            Role::Administrator => Actor::administrator(id),
        }
    })
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Create),
        Just(Action::Read),
        Just(Action::Update),
        Just(Action::Delete),
        "[a-z]{1,8}".prop_map(|f| Action::ReadField(f.into())),
        "[a-z]{1,8}".prop_map(|f| Action::WriteField(f.into())),
    ]
}

/// Actions `scoped_table` has no rule for
fn unconfigured_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Create),
        Just(Action::Delete),
        "[a-z]{1,8}".prop_map(|f| Action::ReadField(f.into())),
        prop_oneof![Just("bio"), Just("averageRating"), Just("verified")]
            .prop_map(|f| Action::WriteField(f.into())),
    ]
}

fn non_admin_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Anonymous),
        Just(Role::Member),
        Just(Role::ScopedStaff)
    ]
}

proptest! {
    /// Unknown resource types are denied to every actor for every action
    #[test]
    fn unconfigured_types_deny_everyone(
        actor in arb_actor(),
        action in arb_action(),
        resource_type in "[a-z]{3,10}",
    ) {
        let table = scoped_table();
        prop_assume!(resource_type != "doctors");

        let decision = evaluate(&table, &actor, &action, &ResourceDescriptor::new(resource_type));
        prop_assert_eq!(decision, Decision::Deny(DenialReason::UnconfiguredResourceType));
    }

    /// A configured type without a rule for the action is denied, administrator included
    ///
    /// Field-level actions are not covered by whole-record rules.
    #[test]
    fn unconfigured_actions_deny_everyone(
        actor in arb_actor(),
        action in unconfigured_action(),
    ) {
        let table = scoped_table();
        let decision = evaluate(
            &table,
            &actor,
            &action,
            &ResourceDescriptor::new("doctors").owned_by_scope("a"),
        );
        prop_assert_eq!(decision, Decision::Deny(DenialReason::NoRuleForAction));
    }

    /// Staff never updates a record owned by another scope
    #[test]
    fn scoped_staff_is_isolated(
        actor_scope in "[a-e]",
        owner_scope in "[a-e]",
        id in "[a-z]{1,6}",
    ) {
        prop_assume!(actor_scope != owner_scope);
        let table = scoped_table();
        let staff = Actor::scoped_staff(id, actor_scope);
        let record = ResourceDescriptor::new("doctors")
            .owned_by_scope(owner_scope)
            .touching(["bio"]);

        prop_assert_eq!(
            evaluate(&table, &staff, &Action::Update, &record),
            Decision::Deny(DenialReason::ScopeMismatch)
        );
    }

    /// Restricted fields are denied to non-administrators even on their own records
    #[test]
    fn restricted_fields_override_grants(
        role in non_admin_role(),
        restricted in prop_oneof![Just("averageRating"), Just("verified")],
        others in proptest::collection::btree_set("[a-z]{1,6}", 0..4),
    ) {
        let table = scoped_table();
        let actor = match role {
            Role::Anonymous => Actor::anonymous(),
            Role::Member => Actor::member("m1"),
            _ => Actor::scoped_staff("s1", "a"),
        };
        let record = ResourceDescriptor::new("doctors")
            .owned_by_scope("a")
            .touching(others)
            .touching([restricted]);

        prop_assert_eq!(
            evaluate(&table, &actor, &Action::Update, &record),
            Decision::Deny(DenialReason::RestrictedField(restricted.into()))
        );
    }

    /// Administrators may write restricted fields
    #[test]
    fn administrators_bypass_restrictions(id in "[a-z]{1,6}") {
        let table = scoped_table();
        let record = ResourceDescriptor::new("doctors")
            .owned_by_scope("a")
            .touching(["averageRating"]);
        prop_assert_eq!(
            evaluate(&table, &Actor::administrator(id), &Action::Update, &record),
            Decision::Allow
        );
    }

    /// Evaluation is deterministic
    #[test]
    fn evaluation_is_pure(actor in arb_actor(), action in arb_action()) {
        let table = clinic_directory_policy().unwrap();
        let record = ResourceDescriptor::new("clinics").owned_by_scope("a").in_state("approved");
        let first = evaluate(&table, &actor, &action, &record);
        let second = evaluate(&table, &actor, &action, &record);
        prop_assert_eq!(first, second);
    }
}

fn clinic(id: &str, state: &str) -> ResourceDescriptor {
    ResourceDescriptor::new("clinics")
        .owned_by_scope(id)
        .in_state(state)
}

fn visible(filter: &VisibilityPredicate, clinics: &[ResourceDescriptor]) -> Vec<String> {
    clinics
        .iter()
        .filter(|c| filter.matches(c))
        .filter_map(|c| c.owner.scope().map(|s| s.to_string()))
        .collect()
}

#[test]
fn clinic_listing_depends_on_role() {
    init_tracing();
    let table = clinic_directory_policy().unwrap();
    let clinics = vec![
        clinic("x", "draft"),
        clinic("y", "approved"),
        clinic("z", "suspended"),
        clinic("w", "approved"),
    ];
    let list = ResourceDescriptor::new("clinics");

    let filter_for = |actor: &Actor| match evaluate(&table, actor, &Action::Read, &list) {
        Decision::AllowWithFilter(filter) => filter,
        other => panic!("expected a filtered read, got {other:?}"),
    };

    let anonymous = filter_for(&Actor::anonymous());
    assert_eq!(visible(&anonymous, &clinics), vec!["y", "w"]);

    let staff = filter_for(&Actor::scoped_staff("staff-x", "x"));
    assert_eq!(visible(&staff, &clinics), vec!["x", "y", "w"]);

    let admin = filter_for(&Actor::administrator("admin"));
    assert!(admin.is_unrestricted());
    assert_eq!(visible(&admin, &clinics).len(), clinics.len());
}

#[test]
fn unassigned_staff_sees_only_public_clinics() {
    let table = clinic_directory_policy().unwrap();
    let decision = evaluate(
        &table,
        &Actor::unassigned_staff("pending"),
        &Action::Update,
        &clinic("x", "draft").touching(["description"]),
    );
    assert_eq!(decision, Decision::Deny(DenialReason::UnassignedScope));
}

#[test]
fn patients_only_touch_their_own_favorites() {
    let table = clinic_directory_policy().unwrap();
    let patient = Actor::member("p1");
    let mine = ResourceDescriptor::new("favoriteclinics").owned_by_identity("p1");
    let theirs = ResourceDescriptor::new("favoriteclinics").owned_by_identity("p2");

    assert_eq!(evaluate(&table, &patient, &Action::Delete, &mine), Decision::Allow);
    assert_eq!(
        evaluate(&table, &patient, &Action::Delete, &theirs),
        Decision::Deny(DenialReason::IdentityMismatch)
    );
    assert_eq!(
        evaluate(&table, &patient, &Action::Read, &ResourceDescriptor::new("favoriteclinics")),
        Decision::AllowWithFilter(VisibilityPredicate::OwnerIdentity("p1".into()))
    );
}

#[test]
fn policy_loads_from_toml() {
    let table = PolicyTable::from_toml_str(
        r#"
        [[rules]]
        resource_type = "pages"
        action = "read"
        allowed_roles = ["anonymous", "member", "scoped_staff"]

        [rules.visible_lifecycle_states]
        anonymous = ["published"]

        [[rules]]
        resource_type = "pages"
        action = "update"
        allowed_roles = ["administrator"]
        "#,
    )
    .unwrap();

    let draft = ResourceDescriptor::new("pages").in_state("draft");
    match evaluate(&table, &Actor::anonymous(), &Action::Read, &ResourceDescriptor::new("pages")) {
        Decision::AllowWithFilter(filter) => assert!(!filter.matches(&draft)),
        other => panic!("unexpected {other:?}"),
    }
    // Members have no lifecycle entry and see every state
    assert_eq!(
        evaluate(&table, &Actor::member("m"), &Action::Read, &ResourceDescriptor::new("pages")),
        Decision::AllowWithFilter(VisibilityPredicate::Unrestricted)
    );
}
