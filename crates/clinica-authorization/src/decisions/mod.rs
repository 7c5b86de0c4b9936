//! Authorization decision logic
//!
//! The evaluator returns decisions as values; this module turns them into
//! enforcement results for the transport layer.

pub mod access_control;

pub use access_control::PolicyEvaluator;
