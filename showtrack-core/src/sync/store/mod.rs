//! Local persistence for entity snapshots, the replay queue and the outbox.
//!
//! Both backends store entities as JSON documents keyed by
//! `(entity kind, id)` and implement [`LocalStore`] for every
//! [`SyncEntity`]. Multi-part changes go through [`Commit`], which a backend
//! must apply atomically so an entity and its queue entry never disagree.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{open_database, SqliteStore};

use async_trait::async_trait;

use super::error::StoreError;
use super::operation::PendingOperation;
use super::outbox::OutboxMessage;
use crate::entity::SyncEntity;
use crate::models::{EntityId, Record};

/// Caller-supplied filter for [`LocalStore::list_all`].
pub type RecordPredicate<'a, E> = &'a (dyn Fn(&Record<E>) -> bool + Send + Sync);

/// Change to the queue entry of one entity.
#[derive(Debug, Clone)]
pub enum QueueChange<E> {
    /// Coalesce with whatever is already queued for the target id.
    Enqueue(PendingOperation<E>),
    /// Overwrite the queued operation as-is (attempt bookkeeping).
    Replace(PendingOperation<E>),
    /// Drop the queued operation; a no-op when nothing is queued.
    Remove(EntityId),
}

/// A set of local changes applied as one transaction.
///
/// Applied in field order: record removals, record write, queue change,
/// alias, outbox message.
#[derive(Debug, Clone)]
pub struct Commit<E> {
    pub remove: Vec<EntityId>,
    pub put: Option<Record<E>>,
    pub queue: Option<QueueChange<E>>,
    /// `(placeholder, server id)` recorded after a first successful create.
    pub alias: Option<(EntityId, EntityId)>,
    pub outbox: Option<OutboxMessage>,
}

impl<E> Default for Commit<E> {
    fn default() -> Self {
        Self {
            remove: Vec::new(),
            put: None,
            queue: None,
            alias: None,
            outbox: None,
        }
    }
}

impl<E> Commit<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, record: Record<E>) -> Self {
        self.put = Some(record);
        self
    }

    pub fn remove(mut self, id: EntityId) -> Self {
        self.remove.push(id);
        self
    }

    pub fn enqueue(mut self, op: PendingOperation<E>) -> Self {
        self.queue = Some(QueueChange::Enqueue(op));
        self
    }

    pub fn replace_operation(mut self, op: PendingOperation<E>) -> Self {
        self.queue = Some(QueueChange::Replace(op));
        self
    }

    pub fn dequeue(mut self, id: EntityId) -> Self {
        self.queue = Some(QueueChange::Remove(id));
        self
    }

    pub fn alias(mut self, placeholder: EntityId, server_id: EntityId) -> Self {
        self.alias = Some((placeholder, server_id));
        self
    }

    pub fn outbox(mut self, message: OutboxMessage) -> Self {
        self.outbox = Some(message);
        self
    }
}

/// Durable key-value storage for one principal's entities of type `E`.
#[async_trait]
pub trait LocalStore<E: SyncEntity>: Send + Sync {
    /// Applies all parts of `commit` atomically.
    ///
    /// Returns the queue entry that resulted from an `Enqueue`/`Replace`
    /// change, after coalescing.
    async fn commit(&self, commit: Commit<E>) -> Result<Option<PendingOperation<E>>, StoreError>;

    /// Missing ids are `Ok(None)`, not an error.
    async fn get(&self, id: &EntityId) -> Result<Option<Record<E>>, StoreError>;

    /// All records accepted by `predicate`, in insertion order.
    async fn list_all(&self, predicate: RecordPredicate<'_, E>)
        -> Result<Vec<Record<E>>, StoreError>;

    /// Queued operations in FIFO order. Operations stay queued until removed.
    async fn dequeue_operations(&self) -> Result<Vec<PendingOperation<E>>, StoreError>;

    async fn pending_operation(
        &self,
        id: &EntityId,
    ) -> Result<Option<PendingOperation<E>>, StoreError>;

    /// Server id a placeholder was replaced with, if any.
    async fn resolve_alias(&self, id: &EntityId) -> Result<Option<EntityId>, StoreError>;

    async fn put(&self, record: &Record<E>) -> Result<(), StoreError> {
        self.commit(Commit::new().put(record.clone())).await?;
        Ok(())
    }

    /// Idempotent: removing an absent id is a no-op.
    async fn remove(&self, id: &EntityId) -> Result<(), StoreError> {
        self.commit(Commit::new().remove(id.clone())).await?;
        Ok(())
    }

    /// Queues `op`, coalescing with any operation already queued for its id.
    async fn enqueue_operation(
        &self,
        op: PendingOperation<E>,
    ) -> Result<PendingOperation<E>, StoreError> {
        let target = op.target_id.clone();
        self.commit(Commit::new().enqueue(op))
            .await?
            .ok_or(StoreError::Deleted(target))
    }

    async fn remove_operation(&self, id: &EntityId) -> Result<(), StoreError> {
        self.commit(Commit::new().dequeue(id.clone())).await?;
        Ok(())
    }
}

/// Queue of side effects waiting to be delivered after a commit.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest messages first.
    async fn outbox_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn record_outbox_failure(&self, id: &str, error: &str) -> Result<(), StoreError>;

    async fn remove_outbox_message(&self, id: &str) -> Result<(), StoreError>;
}
