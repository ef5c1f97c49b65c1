//! In-memory store. Fast but non-persistent; used by tests and ephemeral sessions.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Commit, LocalStore, OutboxStore, QueueChange, RecordPredicate};
use crate::entity::SyncEntity;
use crate::models::{EntityId, Record};
use crate::sync::error::StoreError;
use crate::sync::operation::{coalesce, PendingOperation};
use crate::sync::outbox::OutboxMessage;

type Key = (&'static str, EntityId);

/// A JSON document tagged with its insertion sequence.
#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    body: Value,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<Key, Slot>,
    operations: HashMap<Key, Slot>,
    aliases: HashMap<Key, EntityId>,
    outbox: Vec<OutboxMessage>,
    next_seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Inserts or overwrites, keeping the original position on overwrite.
    fn upsert(&mut self, table: Table, key: Key, body: Value) {
        let seq = self.next_seq();
        let map = match table {
            Table::Records => &mut self.records,
            Table::Operations => &mut self.operations,
        };
        map.entry(key)
            .and_modify(|slot| slot.body = body.clone())
            .or_insert(Slot { seq, body });
    }
}

#[derive(Clone, Copy)]
enum Table {
    Records,
    Operations,
}

/// Store backed by maps behind an async `RwLock`.
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_bodies<'a>(slots: impl Iterator<Item = &'a Slot>) -> Vec<&'a Value> {
    let mut slots: Vec<&Slot> = slots.collect();
    slots.sort_by_key(|slot| slot.seq);
    slots.into_iter().map(|slot| &slot.body).collect()
}

#[async_trait]
impl<E: SyncEntity> LocalStore<E> for MemoryStore {
    async fn commit(&self, commit: Commit<E>) -> Result<Option<PendingOperation<E>>, StoreError> {
        let mut inner = self.inner.write().await;

        // Build every new document before touching the maps so a failure
        // leaves the store unchanged.
        let put = match &commit.put {
            Some(record) => Some((record.id.clone(), serde_json::to_value(record)?)),
            None => None,
        };
        let queue = match commit.queue {
            Some(QueueChange::Enqueue(op)) => {
                let key = (E::KIND, op.target_id.clone());
                let existing = match inner.operations.get(&key) {
                    Some(slot) => Some(serde_json::from_value(slot.body.clone())?),
                    None => None,
                };
                let merged = coalesce(existing, op)?;
                Some(QueueChange::Enqueue(merged))
            }
            other => other,
        };
        let queue_body = match &queue {
            Some(QueueChange::Enqueue(op)) | Some(QueueChange::Replace(op)) => {
                Some(serde_json::to_value(op)?)
            }
            _ => None,
        };

        for id in commit.remove {
            inner.records.remove(&(E::KIND, id));
        }
        if let Some((id, body)) = put {
            inner.upsert(Table::Records, (E::KIND, id), body);
        }

        let mut result = None;
        match queue {
            Some(QueueChange::Enqueue(op)) | Some(QueueChange::Replace(op)) => {
                if let Some(body) = queue_body {
                    inner.upsert(Table::Operations, (E::KIND, op.target_id.clone()), body);
                }
                result = Some(op);
            }
            Some(QueueChange::Remove(id)) => {
                inner.operations.remove(&(E::KIND, id));
            }
            None => {}
        }

        if let Some((placeholder, server_id)) = commit.alias {
            inner.aliases.insert((E::KIND, placeholder), server_id);
        }
        if let Some(message) = commit.outbox {
            inner.outbox.push(message);
        }

        Ok(result)
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Record<E>>, StoreError> {
        let inner = self.inner.read().await;
        match inner.records.get(&(E::KIND, id.clone())) {
            Some(slot) => Ok(Some(serde_json::from_value(slot.body.clone())?)),
            None => Ok(None),
        }
    }

    async fn list_all(
        &self,
        predicate: RecordPredicate<'_, E>,
    ) -> Result<Vec<Record<E>>, StoreError> {
        let inner = self.inner.read().await;
        let bodies = sorted_bodies(
            inner
                .records
                .iter()
                .filter(|((kind, _), _)| *kind == E::KIND)
                .map(|(_, slot)| slot),
        );

        let mut records = Vec::new();
        for body in bodies {
            let record: Record<E> = serde_json::from_value(body.clone())?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn dequeue_operations(&self) -> Result<Vec<PendingOperation<E>>, StoreError> {
        let inner = self.inner.read().await;
        let bodies = sorted_bodies(
            inner
                .operations
                .iter()
                .filter(|((kind, _), _)| *kind == E::KIND)
                .map(|(_, slot)| slot),
        );
        bodies
            .into_iter()
            .map(|body| serde_json::from_value(body.clone()).map_err(StoreError::from))
            .collect()
    }

    async fn pending_operation(
        &self,
        id: &EntityId,
    ) -> Result<Option<PendingOperation<E>>, StoreError> {
        let inner = self.inner.read().await;
        match inner.operations.get(&(E::KIND, id.clone())) {
            Some(slot) => Ok(Some(serde_json::from_value(slot.body.clone())?)),
            None => Ok(None),
        }
    }

    async fn resolve_alias(&self, id: &EntityId) -> Result<Option<EntityId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.aliases.get(&(E::KIND, id.clone())).cloned())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn outbox_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.outbox.iter().take(limit).cloned().collect())
    }

    async fn record_outbox_failure(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(message) = inner.outbox.iter_mut().find(|m| m.id == id) {
            message.attempts += 1;
            message.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn remove_outbox_message(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.outbox.retain(|m| m.id != id);
        Ok(())
    }
}
