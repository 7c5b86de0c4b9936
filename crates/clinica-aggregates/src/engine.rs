//! Aggregate recompute engine
//!
//! Every change is handled by full recompute of each affected parent: read
//! that parent's qualifying children, combine their values, write the
//! result. Recompute is idempotent, so retries and reconciliation sweeps can
//! run it any number of times.

use crate::config::EngineConfig;
use crate::definition::AggregateDefinition;
use crate::errors::{AggregateError, AggregateResult};
use crate::locks::KeyedLocks;
use crate::port::{ChildChangeHandler, ChildQuery, PersistencePort};
use crate::record::{ChildChangeEvent, ParentKey};
use crate::registry::AggregateRegistry;
use async_trait::async_trait;
use clinica_core::{FieldName, RecordKey, ResourceType, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// One unit of recompute work: a single aggregate field of one parent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecomputeJob {
    /// Parent to recompute
    pub parent: ParentKey,
    /// Aggregate field to refresh
    pub target_field: FieldName,
}

impl fmt::Display for RecomputeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.parent, self.target_field)
    }
}

/// Outcome of a reconciliation sweep
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Parents whose aggregates were rewritten
    pub recomputed: usize,
    /// Parents that still failed after retries
    pub failed: Vec<(RecordKey, AggregateError)>,
}

impl ReconcileReport {
    /// Whether every parent was recomputed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Keeps aggregate fields equal to the aggregate of their qualifying children
///
/// The engine is the only writer of the fields its registry defines.
pub struct AggregateEngine {
    registry: Arc<AggregateRegistry>,
    port: Arc<dyn PersistencePort>,
    locks: KeyedLocks<ParentKey>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl fmt::Debug for AggregateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateEngine")
            .field("definitions", &self.registry.len())
            .field("active_locks", &self.locks.active())
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl AggregateEngine {
    /// Engine with the default retry policy and attempt deadline
    pub fn new(registry: Arc<AggregateRegistry>, port: Arc<dyn PersistencePort>) -> Self {
        Self::from_config(registry, port, &EngineConfig::default())
    }

    /// Engine using the retry policy and attempt deadline from `config`
    pub fn from_config(
        registry: Arc<AggregateRegistry>,
        port: Arc<dyn PersistencePort>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            port,
            locks: KeyedLocks::new(),
            retry: config.retry.clone(),
            attempt_timeout: config.attempt_timeout,
        }
    }

    /// Replace the retry policy for transient port failures
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the deadline of a single recompute attempt
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Definitions this engine maintains
    pub fn registry(&self) -> &AggregateRegistry {
        &self.registry
    }

    /// Subscribe to every child type in the registry
    pub async fn attach(self: &Arc<Self>) -> AggregateResult<()> {
        let handler: Arc<dyn ChildChangeHandler> = self.clone();
        subscribe_all(&self.registry, self.port.as_ref(), handler).await
    }

    /// Bring every aggregate affected by a committed child change up to date
    ///
    /// All affected parents are attempted; the first failure is returned.
    #[instrument(skip(self, event), fields(kind = %event.kind, child_type = %event.child_type))]
    pub async fn on_child_changed(&self, event: &ChildChangeEvent) -> AggregateResult<()> {
        let jobs = self.jobs_for(event)?;

        let mut first_error = None;
        for job in &jobs {
            if let Err(error) = self.recompute_field(&job.parent, &job.target_field).await {
                tracing::error!(%job, %error, "aggregate left stale");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Recompute work implied by `event`
    ///
    /// When a child moved between parents both parents are included.
    pub fn jobs_for(&self, event: &ChildChangeEvent) -> AggregateResult<Vec<RecomputeJob>> {
        event
            .validate()
            .map_err(|message| AggregateError::MalformedEvent { message })?;

        let jobs: Vec<RecomputeJob> = self
            .registry
            .definitions_for_child(&event.child_type)
            .flat_map(|definition| {
                event
                    .affected_parents(definition)
                    .into_iter()
                    .map(|parent| RecomputeJob {
                        parent,
                        target_field: definition.target_field.clone(),
                    })
            })
            .collect();

        if jobs.is_empty() {
            tracing::trace!(child_type = %event.child_type, "change affects no aggregate");
        }
        Ok(jobs)
    }

    /// Recompute every aggregate field of one parent
    ///
    /// This is the unit of work for reconciliation sweeps.
    #[instrument(skip(self))]
    pub async fn recompute(
        &self,
        parent_type: &ResourceType,
        key: &RecordKey,
    ) -> AggregateResult<()> {
        let parent = ParentKey::new(parent_type.clone(), key.clone());
        let definitions: Vec<Arc<AggregateDefinition>> = self
            .registry
            .definitions_for_parent(parent_type)
            .cloned()
            .collect();
        if definitions.is_empty() {
            return Err(AggregateError::UnknownAggregate {
                parent_type: parent_type.clone(),
                field: None,
            });
        }

        let mut first_error = None;
        for definition in &definitions {
            if let Err(error) = self.recompute_with_retry(definition, &parent).await {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Recompute one aggregate field of one parent, retrying transient failures
    pub async fn recompute_field(
        &self,
        parent: &ParentKey,
        target_field: &FieldName,
    ) -> AggregateResult<Option<f64>> {
        let definition = self.definition(parent, target_field)?;
        self.recompute_with_retry(&definition, parent).await
    }

    /// Single deadline-bounded recompute attempt without retries
    pub(crate) async fn recompute_field_once(
        &self,
        parent: &ParentKey,
        target_field: &FieldName,
    ) -> AggregateResult<Option<f64>> {
        let definition = self.definition(parent, target_field)?;
        self.attempt(&definition, parent).await
    }

    /// Recompute every listed parent of `parent_type`
    ///
    /// Failures are collected rather than aborting the sweep.
    #[instrument(skip(self, keys))]
    pub async fn reconcile<I>(
        &self,
        parent_type: &ResourceType,
        keys: I,
    ) -> AggregateResult<ReconcileReport>
    where
        I: IntoIterator<Item = RecordKey>,
    {
        if self.registry.definitions_for_parent(parent_type).next().is_none() {
            return Err(AggregateError::UnknownAggregate {
                parent_type: parent_type.clone(),
                field: None,
            });
        }

        let mut report = ReconcileReport::default();
        for key in keys {
            match self.recompute(parent_type, &key).await {
                Ok(()) => report.recomputed += 1,
                Err(error) => report.failed.push((key, error)),
            }
        }
        tracing::info!(
            %parent_type,
            recomputed = report.recomputed,
            failed = report.failed.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    fn definition(
        &self,
        parent: &ParentKey,
        target_field: &FieldName,
    ) -> AggregateResult<Arc<AggregateDefinition>> {
        self.registry
            .definition(&parent.parent_type, target_field)
            .cloned()
            .ok_or_else(|| AggregateError::UnknownAggregate {
                parent_type: parent.parent_type.clone(),
                field: Some(target_field.clone()),
            })
    }

    async fn recompute_with_retry(
        &self,
        definition: &AggregateDefinition,
        parent: &ParentKey,
    ) -> AggregateResult<Option<f64>> {
        let outcome = self
            .retry
            .execute_with_context(
                || self.attempt(definition, parent),
                AggregateError::is_transient,
            )
            .await;

        if outcome.had_retries() && outcome.is_success() {
            tracing::info!(
                %parent,
                field = %definition.target_field,
                attempts = outcome.attempts,
                "aggregate recomputed after retries"
            );
        }
        outcome.into_result()
    }

    /// One deadline-bounded attempt; expiry releases the parent's lock
    async fn attempt(
        &self,
        definition: &AggregateDefinition,
        parent: &ParentKey,
    ) -> AggregateResult<Option<f64>> {
        let deadline = self.attempt_timeout;
        match tokio::time::timeout(deadline, self.locked_attempt(definition, parent)).await {
            Ok(result) => result,
            Err(_) => {
                let error = AggregateError::Timeout {
                    parent: parent.clone(),
                    after: deadline,
                };
                tracing::warn!(%parent, ?deadline, "recompute attempt timed out");
                Err(error)
            }
        }
    }

    /// Read-then-write under the parent's critical section
    async fn locked_attempt(
        &self,
        definition: &AggregateDefinition,
        parent: &ParentKey,
    ) -> AggregateResult<Option<f64>> {
        let _guard = self.locks.lock(parent).await;

        let children = self
            .port
            .find_qualifying_children(ChildQuery::for_definition(definition, parent))
            .await
            .map_err(|source| AggregateError::ReadFailure {
                parent: parent.clone(),
                source,
            });
        let children = match children {
            Ok(children) => children,
            Err(error) => {
                tracing::warn!(%parent, %error, "recompute attempt failed");
                return Err(error);
            }
        };

        let value = definition.compute(&children);
        if let Err(source) = self
            .port
            .write_aggregate(parent, &definition.target_field, value)
            .await
        {
            let error = AggregateError::WriteFailure {
                parent: parent.clone(),
                source,
            };
            tracing::warn!(%parent, %error, "recompute attempt failed");
            return Err(error);
        }

        tracing::debug!(
            %parent,
            field = %definition.target_field,
            ?value,
            children = children.len(),
            "aggregate recomputed"
        );
        Ok(value)
    }
}

#[async_trait]
impl ChildChangeHandler for AggregateEngine {
    async fn handle(&self, event: ChildChangeEvent) -> AggregateResult<()> {
        self.on_child_changed(&event).await
    }
}

/// Subscribe `handler` to every child type of `registry`
pub(crate) async fn subscribe_all(
    registry: &AggregateRegistry,
    port: &dyn PersistencePort,
    handler: Arc<dyn ChildChangeHandler>,
) -> AggregateResult<()> {
    for child_type in registry.child_types() {
        port.subscribe(child_type, handler.clone())
            .await
            .map_err(|source| AggregateError::Subscription {
                child_type: child_type.clone(),
                source,
            })?;
        tracing::debug!(%child_type, "subscribed to child changes");
    }
    Ok(())
}
