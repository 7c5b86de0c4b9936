//! In-memory persistence port
//!
//! Commits child records, then delivers the change to subscribed handlers
//! and returns their verdict to the writer. Parent writes from outside the
//! engine go through the registry's reserved-field guard. Read and write
//! faults can be injected to exercise retry and failure paths.

use crate::errors::{AggregateError, PersistenceError};
use crate::port::{ChildChangeHandler, ChildQuery, PersistencePort};
use crate::record::{ChildChangeEvent, ChildRecord, ParentKey};
use crate::registry::AggregateRegistry;
use async_trait::async_trait;
use clinica_core::{FieldName, RecordKey, ResourceType};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Errors from direct store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Record to update or delete does not exist
    #[error("record {child_type}:{key} not found")]
    NotFound {
        /// Child type
        child_type: ResourceType,
        /// Record key
        key: RecordKey,
    },

    /// Record to insert already exists
    #[error("record {child_type}:{key} already exists")]
    AlreadyExists {
        /// Child type
        child_type: ResourceType,
        /// Record key
        key: RecordKey,
    },

    /// The child committed but a change handler failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

#[derive(Debug, Default)]
struct FaultPlan {
    failing_reads: u32,
    failing_writes: u32,
    transient: bool,
    read_delay: Option<Duration>,
}

#[derive(Default)]
struct Tables {
    children: BTreeMap<(ResourceType, RecordKey), ChildRecord>,
    parents: BTreeMap<ParentKey, BTreeMap<FieldName, Value>>,
}

/// Map-backed store implementing [`PersistencePort`]
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    handlers: RwLock<HashMap<ResourceType, Vec<Arc<dyn ChildChangeHandler>>>>,
    faults: Mutex<FaultPlan>,
    guard: Option<Arc<AggregateRegistry>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("InMemoryStore")
            .field("children", &tables.children.len())
            .field("parents", &tables.parents.len())
            .finish()
    }
}

impl InMemoryStore {
    /// Empty store without a write guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store rejecting external writes to `registry`'s aggregate fields
    pub fn guarded_by(registry: Arc<AggregateRegistry>) -> Self {
        Self {
            guard: Some(registry),
            ..Self::default()
        }
    }

    /// Create a child record and notify subscribers
    ///
    /// Replacing an existing record goes through [`update`](Self::update).
    pub async fn insert(&self, record: ChildRecord) -> Result<(), StoreError> {
        {
            let mut tables = self.tables.write();
            match tables
                .children
                .entry((record.child_type.clone(), record.key.clone()))
            {
                Entry::Occupied(_) => {
                    return Err(StoreError::AlreadyExists {
                        child_type: record.child_type,
                        key: record.key,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                }
            }
        }
        self.notify(ChildChangeEvent::inserted(record)).await
    }

    /// Replace an existing child record and notify subscribers
    pub async fn update(&self, record: ChildRecord) -> Result<(), StoreError> {
        let before = {
            let mut tables = self.tables.write();
            let slot = tables
                .children
                .get_mut(&(record.child_type.clone(), record.key.clone()))
                .ok_or_else(|| StoreError::NotFound {
                    child_type: record.child_type.clone(),
                    key: record.key.clone(),
                })?;
            std::mem::replace(slot, record.clone())
        };
        self.notify(ChildChangeEvent::updated(before, record)).await
    }

    /// Remove a child record and notify subscribers
    pub async fn delete(
        &self,
        child_type: &ResourceType,
        key: &RecordKey,
    ) -> Result<(), StoreError> {
        let removed = self
            .tables
            .write()
            .children
            .remove(&(child_type.clone(), key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                child_type: child_type.clone(),
                key: key.clone(),
            })?;
        self.notify(ChildChangeEvent::deleted(removed)).await
    }

    /// Write parent fields on behalf of an ordinary caller
    pub fn write_parent_fields(
        &self,
        parent: &ParentKey,
        fields: BTreeMap<FieldName, Value>,
    ) -> Result<(), StoreError> {
        if let Some(registry) = &self.guard {
            registry.guard_parent_write(&parent.parent_type, fields.keys())?;
        }
        self.tables
            .write()
            .parents
            .entry(parent.clone())
            .or_default()
            .extend(fields);
        Ok(())
    }

    /// Stored value of a parent field; `Some(Value::Null)` when cleared
    pub fn parent_field(&self, parent: &ParentKey, field: &str) -> Option<Value> {
        self.tables
            .read()
            .parents
            .get(parent)
            .and_then(|fields| fields.get(field))
            .cloned()
    }

    /// Numeric aggregate stored on a parent, `None` when null or never written
    pub fn aggregate(&self, parent: &ParentKey, field: &str) -> Option<f64> {
        self.parent_field(parent, field).and_then(|v| v.as_f64())
    }

    /// Stored child record
    pub fn child(&self, child_type: &ResourceType, key: &RecordKey) -> Option<ChildRecord> {
        self.tables
            .read()
            .children
            .get(&(child_type.clone(), key.clone()))
            .cloned()
    }

    /// Fail the next `count` reads
    pub fn fail_next_reads(&self, count: u32, transient: bool) {
        let mut faults = self.faults.lock();
        faults.failing_reads = count;
        faults.transient = transient;
    }

    /// Fail the next `count` aggregate writes
    pub fn fail_next_writes(&self, count: u32, transient: bool) {
        let mut faults = self.faults.lock();
        faults.failing_writes = count;
        faults.transient = transient;
    }

    /// Delay every read by `delay`
    pub fn delay_reads(&self, delay: Option<Duration>) {
        self.faults.lock().read_delay = delay;
    }

    /// Child queries served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Aggregate writes applied so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn notify(&self, event: ChildChangeEvent) -> Result<(), StoreError> {
        let handlers = self
            .handlers
            .read()
            .get(&event.child_type)
            .cloned()
            .unwrap_or_default();

        let mut first_error = None;
        for handler in handlers {
            if let Err(error) = handler.handle(event.clone()).await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(StoreError::Aggregate(error)),
            None => Ok(()),
        }
    }

    fn injected(
        counter: &mut u32,
        transient: bool,
        operation: &str,
    ) -> Result<(), PersistenceError> {
        if *counter == 0 {
            return Ok(());
        }
        *counter -= 1;
        if transient {
            Err(PersistenceError::unavailable(format!("injected {operation} fault")))
        } else {
            Err(PersistenceError::rejected(format!("injected {operation} fault")))
        }
    }
}

#[async_trait]
impl PersistencePort for InMemoryStore {
    async fn find_qualifying_children(
        &self,
        query: ChildQuery<'_>,
    ) -> Result<Vec<ChildRecord>, PersistenceError> {
        let delay = {
            let mut faults = self.faults.lock();
            let transient = faults.transient;
            Self::injected(&mut faults.failing_reads, transient, "read")?;
            faults.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read();
        Ok(tables
            .children
            .range((query.child_type.clone(), RecordKey::new(""))..)
            .take_while(|((child_type, _), _)| child_type == query.child_type)
            .map(|(_, record)| record)
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }

    async fn write_aggregate(
        &self,
        parent: &ParentKey,
        field: &FieldName,
        value: Option<f64>,
    ) -> Result<(), PersistenceError> {
        {
            let mut faults = self.faults.lock();
            let transient = faults.transient;
            Self::injected(&mut faults.failing_writes, transient, "write")?;
        }

        // Engine writes bypass the guard and emit no change events
        let value = value.map_or(Value::Null, Value::from);
        self.tables
            .write()
            .parents
            .entry(parent.clone())
            .or_default()
            .insert(field.clone(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(
        &self,
        child_type: &ResourceType,
        handler: Arc<dyn ChildChangeHandler>,
    ) -> Result<(), PersistenceError> {
        self.handlers
            .write()
            .entry(child_type.clone())
            .or_default()
            .push(handler);
        Ok(())
    }
}
