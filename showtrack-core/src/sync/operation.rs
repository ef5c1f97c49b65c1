//! Pending operations and the coalescing rules for the replay queue.
//!
//! The queue holds at most one operation per entity id. A new local mutation
//! is folded into whatever is already queued for that id:
//!
//! | queued  | incoming | result                         |
//! |---------|----------|--------------------------------|
//! | (none)  | any      | incoming                       |
//! | create  | update   | create with the latest payload |
//! | update  | update   | latest update                  |
//! | any     | delete   | delete                         |
//! | delete  | any      | rejected, deletion is terminal |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::StoreError;
use crate::models::{EntityId, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// What to replay, with the payload captured at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Operation<E> {
    Create(E),
    Update(E),
    Delete,
}

impl<E> Operation<E> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create(_) => OperationKind::Create,
            Operation::Update(_) => OperationKind::Update,
            Operation::Delete => OperationKind::Delete,
        }
    }
}

/// An entry in the replay queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation<E> {
    pub target_id: EntityId,
    pub operation: Operation<E>,
    /// Record version the snapshot was taken from.
    pub version: u64,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl<E: Clone> PendingOperation<E> {
    pub fn create(record: &Record<E>) -> Self {
        Self::new(record, Operation::Create(record.payload.clone()))
    }

    pub fn update(record: &Record<E>) -> Self {
        Self::new(record, Operation::Update(record.payload.clone()))
    }

    pub fn delete(record: &Record<E>) -> Self {
        Self::new(record, Operation::Delete)
    }

    /// A delete for an entity that has no local record.
    pub fn delete_remote(target_id: EntityId) -> Self {
        Self {
            target_id,
            operation: Operation::Delete,
            version: 0,
            attempt_count: 0,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }

    fn new(record: &Record<E>, operation: Operation<E>) -> Self {
        Self {
            target_id: record.id.clone(),
            operation,
            version: record.version,
            attempt_count: 0,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }
}

impl<E> PendingOperation<E> {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.last_error = Some(error.to_string());
        self
    }

    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt_count >= max_attempts
    }
}

/// Folds `incoming` into the operation already queued for the same id.
///
/// The merged operation keeps the queue position (`enqueued_at`) of the
/// existing one and starts over with zero attempts, since it carries a
/// payload that has never been tried.
pub fn coalesce<E>(
    existing: Option<PendingOperation<E>>,
    incoming: PendingOperation<E>,
) -> Result<PendingOperation<E>, StoreError> {
    let Some(existing) = existing else {
        return Ok(incoming);
    };

    let operation = match (existing.operation, incoming.operation) {
        (Operation::Delete, _) => return Err(StoreError::Deleted(existing.target_id)),
        (_, Operation::Delete) => Operation::Delete,
        (Operation::Create(_), Operation::Create(payload) | Operation::Update(payload)) => {
            Operation::Create(payload)
        }
        (Operation::Update(_), Operation::Create(payload) | Operation::Update(payload)) => {
            Operation::Update(payload)
        }
    };

    Ok(PendingOperation {
        target_id: existing.target_id,
        operation,
        version: existing.version.max(incoming.version),
        attempt_count: 0,
        last_error: incoming.last_error,
        enqueued_at: existing.enqueued_at,
    })
}
