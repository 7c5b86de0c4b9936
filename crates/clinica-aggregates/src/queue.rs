//! Recompute queue
//!
//! Non-blocking submission in front of the engine. Jobs are sharded across a
//! fixed set of workers by parent key, so jobs for one parent run one at a
//! time in submission order while different parents proceed in parallel.
//!
//! Each attempt runs under the engine's deadline. Timed-out and transiently
//! failed attempts are retried in place with backoff (at-least-once); a job
//! that exhausts its budget is logged and handed to the dead-letter channel.

use crate::config::EngineConfig;
use crate::engine::{subscribe_all, AggregateEngine, RecomputeJob};
use crate::errors::{AggregateError, AggregateResult};
use crate::port::{ChildChangeHandler, PersistencePort};
use crate::record::ChildChangeEvent;
use async_trait::async_trait;
use clinica_core::RetryPolicy;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A job the queue gave up on
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The abandoned job
    pub job: RecomputeJob,
    /// Attempts made
    pub attempts: u32,
    /// Last failure
    pub error: AggregateError,
}

/// Receiving end of the dead-letter channel
pub type DeadLetters = mpsc::UnboundedReceiver<DeadLetter>;

/// Sharded worker pool draining recompute jobs
pub struct RecomputeQueue {
    engine: Arc<AggregateEngine>,
    shards: Mutex<Option<Vec<mpsc::Sender<RecomputeJob>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RecomputeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecomputeQueue")
            .field("workers", &self.workers.lock().len())
            .field("open", &self.shards.lock().is_some())
            .finish()
    }
}

impl RecomputeQueue {
    /// Spawn `config.workers` workers on the current runtime
    ///
    /// Attempt deadlines come from `engine`; build it with
    /// [`AggregateEngine::from_config`] to share `config.attempt_timeout`.
    pub fn start(engine: Arc<AggregateEngine>, config: &EngineConfig) -> (Arc<Self>, DeadLetters) {
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let workers = config.workers.max(1);

        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            shards.push(tx);
            handles.push(tokio::spawn(run_worker(
                worker,
                engine.clone(),
                rx,
                config.retry.clone(),
                dead_tx.clone(),
            )));
        }
        tracing::info!(workers, "recompute queue started");

        let queue = Arc::new(Self {
            engine,
            shards: Mutex::new(Some(shards)),
            workers: Mutex::new(handles),
        });
        (queue, dead_rx)
    }

    /// Subscribe the queue to every child type of the engine's registry
    pub async fn attach(self: &Arc<Self>, port: &dyn PersistencePort) -> AggregateResult<()> {
        let handler: Arc<dyn ChildChangeHandler> = self.clone();
        subscribe_all(self.engine.registry(), port, handler).await
    }

    /// Queue a job, waiting while its shard is full
    pub async fn submit(&self, job: RecomputeJob) -> AggregateResult<()> {
        let sender = self.shard_for(&job)?;
        sender
            .send(job)
            .await
            .map_err(|_| AggregateError::QueueClosed)
    }

    /// Queue a job without waiting
    ///
    /// A full shard is reported as an error, never silently dropped.
    pub fn try_submit(&self, job: RecomputeJob) -> AggregateResult<()> {
        let sender = self.shard_for(&job)?;
        sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) => {
                tracing::warn!(%job, "recompute shard full");
                AggregateError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => AggregateError::QueueClosed,
        })
    }

    /// Queue every job implied by `event`, returning how many were queued
    pub async fn enqueue(&self, event: &ChildChangeEvent) -> AggregateResult<usize> {
        let jobs = self.engine.jobs_for(event)?;
        let count = jobs.len();
        for job in jobs {
            self.submit(job).await?;
        }
        Ok(count)
    }

    /// Stop accepting jobs and wait for queued ones to drain
    pub async fn shutdown(&self) {
        let shards = self.shards.lock().take();
        drop(shards);

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(%error, "recompute worker panicked");
            }
        }
        tracing::info!("recompute queue drained");
    }

    fn shard_for(&self, job: &RecomputeJob) -> AggregateResult<mpsc::Sender<RecomputeJob>> {
        let shards = self.shards.lock();
        let shards = shards.as_ref().ok_or(AggregateError::QueueClosed)?;

        let mut hasher = DefaultHasher::new();
        job.parent.hash(&mut hasher);
        let index = (hasher.finish() % shards.len() as u64) as usize;
        shards
            .get(index)
            .cloned()
            .ok_or(AggregateError::QueueClosed)
    }
}

#[async_trait]
impl ChildChangeHandler for RecomputeQueue {
    async fn handle(&self, event: ChildChangeEvent) -> AggregateResult<()> {
        self.enqueue(&event).await.map(|_| ())
    }
}

async fn run_worker(
    worker: usize,
    engine: Arc<AggregateEngine>,
    mut jobs: mpsc::Receiver<RecomputeJob>,
    retry: RetryPolicy,
    dead_letters: mpsc::UnboundedSender<DeadLetter>,
) {
    while let Some(job) = jobs.recv().await {
        let outcome = retry
            .execute_with_context(
                || engine.recompute_field_once(&job.parent, &job.target_field),
                AggregateError::is_transient,
            )
            .await;

        let attempts = outcome.attempts;
        if let Err(error) = outcome.into_result() {
            tracing::error!(
                worker,
                %job,
                attempts,
                %error,
                "recompute abandoned; aggregate is stale"
            );
            if dead_letters
                .send(DeadLetter {
                    job,
                    attempts,
                    error,
                })
                .is_err()
            {
                tracing::warn!(worker, "dead-letter receiver dropped");
            }
        } else if attempts > 1 {
            tracing::info!(worker, %job, attempts, "recompute succeeded after retries");
        }
    }
    tracing::debug!(worker, "recompute worker stopped");
}
