//! Clinica Authorization - data-driven access policy evaluation
//!
//! Every request is decided by one interpreter over one rule table:
//!
//! - [`Actor`] says who is asking (role, assigned scope, identity)
//! - [`ResourceDescriptor`] says what is being acted on (type, owner,
//!   lifecycle state, touched fields)
//! - [`PolicyTable`] holds the static [`PolicyRule`]s, loaded once
//! - [`evaluate`] maps the three to a [`Decision`]
//!
//! Reads are answered with a [`VisibilityPredicate`] the caller ANDs into its
//! query. Denial is a value, never a panic or an error, until the
//! [`PolicyEvaluator`] enforcement helpers turn it into
//! [`PolicyError::PolicyDenied`].
//!
//! ```
//! use clinica_authorization::{
//!     clinic_directory_policy, evaluate, Action, Actor, Decision, ResourceDescriptor,
//! };
//!
//! let table = clinic_directory_policy().unwrap();
//! let staff = Actor::scoped_staff("staff-1", "clinic-1");
//! let other_clinic = ResourceDescriptor::new("clinics")
//!     .owned_by_scope("clinic-2")
//!     .touching(["description"]);
//!
//! assert!(matches!(
//!     evaluate(&table, &staff, &Action::Update, &other_clinic),
//!     Decision::Deny(_)
//! ));
//! ```

#![forbid(unsafe_code)]

/// Actors, roles and scopes
pub mod actor;

/// Enforcement of policy decisions
pub mod decisions;

/// Authorization errors
pub mod errors;

/// Built-in clinic directory rules
pub mod matrix;

/// Rule table, evaluator and visibility predicates
pub mod policy;

/// Resource descriptors and actions
pub mod resource;

pub use actor::{Actor, ActorInvariantError, Role};
pub use decisions::PolicyEvaluator;
pub use errors::{PolicyError, PolicyResult};
pub use matrix::{clinic_directory_policy, clinic_directory_rules};
pub use policy::{
    evaluate, Decision, DenialReason, PolicyDocument, PolicyRule, PolicyTable, TypePolicy,
    VisibilityPredicate,
};
pub use resource::{Action, ActionKind, Ownership, ResourceDescriptor, ResourceInvariantError};
