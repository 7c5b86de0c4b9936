//! Authorization policies and evaluation

pub mod evaluation;
pub mod rules;
pub mod visibility;

pub use evaluation::{evaluate, Decision, DenialReason};
pub use rules::{PolicyDocument, PolicyRule, PolicyTable, TypePolicy};
pub use visibility::VisibilityPredicate;
