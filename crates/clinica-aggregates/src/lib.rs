//! Clinica Aggregates - derived fields kept consistent with their children
//!
//! An [`AggregateRegistry`] declares which parent fields are derived from
//! which child records. The [`AggregateEngine`] is the only writer of those
//! fields: on every committed child change it fully recomputes each affected
//! parent through the [`PersistencePort`], serialized per parent key.
//!
//! Callers that must not block on storage put a [`RecomputeQueue`] in front
//! of the engine. The same engine entry point, [`AggregateEngine::recompute`],
//! serves reconciliation sweeps.
//!
//! An aggregate over zero qualifying children is null, never zero.

#![forbid(unsafe_code)]

/// Engine and queue configuration
pub mod config;

/// Aggregate definitions and qualifying predicates
pub mod definition;

/// Recompute engine
pub mod engine;

/// Error types
pub mod errors;

/// Per-parent critical sections
pub mod locks;

/// In-memory persistence port
pub mod memory;

/// Persistence port traits
pub mod port;

/// Sharded worker queue
pub mod queue;

/// Child records and change events
pub mod record;

/// Definition registry
pub mod registry;

pub use config::EngineConfig;
pub use definition::{AggregateDefinition, AggregateFn, QualifyingPredicate};
pub use engine::{AggregateEngine, ReconcileReport, RecomputeJob};
pub use errors::{AggregateError, AggregateResult, PersistenceError};
pub use locks::KeyedLocks;
pub use memory::{InMemoryStore, StoreError};
pub use port::{ChildChangeHandler, ChildQuery, PersistencePort};
pub use queue::{DeadLetter, DeadLetters, RecomputeQueue};
pub use record::{ChangeKind, ChildChangeEvent, ChildRecord, ParentKey};
pub use registry::{clinic_directory_aggregates, AggregateDocument, AggregateRegistry};
