use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;

use super::{Commit, LocalStore, OutboxStore, QueueChange, RecordPredicate};
use crate::entity::SyncEntity;
use crate::models::{EntityId, Record};
use crate::sync::error::StoreError;
use crate::sync::operation::{coalesce, PendingOperation};
use crate::sync::outbox::OutboxMessage;

/// Opens (creating if needed) the database at `path` and runs migrations.
pub async fn open_database(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// SQLite-backed store. Every row is scoped to one principal.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    scope: String,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: String,
    entity_kind: String,
    entity_id: String,
    payload: String,
    attempts: i64,
    last_error: Option<String>,
    created_at: String,
}

impl OutboxRow {
    fn into_message(self) -> Result<OutboxMessage, StoreError> {
        Ok(OutboxMessage {
            id: self.id,
            entity_kind: self.entity_kind,
            entity_id: EntityId::new(self.entity_id),
            payload: serde_json::from_str(&self.payload)?,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            last_error: self.last_error,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, scope: impl Into<String>) -> Self {
        Self {
            pool,
            scope: scope.into(),
        }
    }

    /// Opens the database at `path` and scopes the store to `scope`.
    pub async fn open(path: &Path, scope: impl Into<String>) -> Result<Self, StoreError> {
        let pool = open_database(path).await?;
        Ok(Self::new(pool, scope))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    async fn load_operation<E: SyncEntity>(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &EntityId,
    ) -> Result<Option<PendingOperation<E>>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM pending_operations WHERE scope = ? AND kind = ? AND target_id = ?",
        )
        .bind(&self.scope)
        .bind(E::KIND)
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some((body,)) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn write_operation<E: SyncEntity>(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        op: &PendingOperation<E>,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(op)?;
        sqlx::query(
            r#"
            INSERT INTO pending_operations (scope, kind, target_id, operation, body, attempt_count, enqueued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (scope, kind, target_id) DO UPDATE SET
                operation = excluded.operation,
                body = excluded.body,
                attempt_count = excluded.attempt_count
            "#,
        )
        .bind(&self.scope)
        .bind(E::KIND)
        .bind(op.target_id.as_str())
        .bind(op.kind().to_string())
        .bind(&body)
        .bind(i64::from(op.attempt_count))
        .bind(op.enqueued_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<E: SyncEntity> LocalStore<E> for SqliteStore {
    async fn commit(&self, commit: Commit<E>) -> Result<Option<PendingOperation<E>>, StoreError> {
        let mut tx = self.pool.begin().await?;

        for id in &commit.remove {
            sqlx::query("DELETE FROM records WHERE scope = ? AND kind = ? AND id = ?")
                .bind(&self.scope)
                .bind(E::KIND)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        if let Some(record) = &commit.put {
            let body = serde_json::to_string(record)?;
            sqlx::query(
                r#"
                INSERT INTO records (scope, kind, id, body, sync_status, version, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (scope, kind, id) DO UPDATE SET
                    body = excluded.body,
                    sync_status = excluded.sync_status,
                    version = excluded.version,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.scope)
            .bind(E::KIND)
            .bind(record.id.as_str())
            .bind(&body)
            .bind(record.sync_status.to_string())
            .bind(i64::try_from(record.version).unwrap_or(i64::MAX))
            .bind(record.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        let mut result = None;
        match commit.queue {
            Some(QueueChange::Enqueue(op)) => {
                let existing = self.load_operation::<E>(&mut tx, &op.target_id).await?;
                let merged = coalesce(existing, op)?;
                self.write_operation(&mut tx, &merged).await?;
                result = Some(merged);
            }
            Some(QueueChange::Replace(op)) => {
                self.write_operation(&mut tx, &op).await?;
                result = Some(op);
            }
            Some(QueueChange::Remove(id)) => {
                sqlx::query(
                    "DELETE FROM pending_operations WHERE scope = ? AND kind = ? AND target_id = ?",
                )
                .bind(&self.scope)
                .bind(E::KIND)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            }
            None => {}
        }

        if let Some((placeholder, server_id)) = &commit.alias {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO id_aliases (scope, kind, placeholder_id, server_id, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.scope)
            .bind(E::KIND)
            .bind(placeholder.as_str())
            .bind(server_id.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(message) = &commit.outbox {
            sqlx::query(
                r#"
                INSERT INTO outbox (scope, id, entity_kind, entity_id, payload, attempts, last_error, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.scope)
            .bind(&message.id)
            .bind(&message.entity_kind)
            .bind(message.entity_id.as_str())
            .bind(serde_json::to_string(&message.payload)?)
            .bind(i64::from(message.attempts))
            .bind(&message.last_error)
            .bind(message.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result)
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Record<E>>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM records WHERE scope = ? AND kind = ? AND id = ?")
                .bind(&self.scope)
                .bind(E::KIND)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((body,)) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn list_all(
        &self,
        predicate: RecordPredicate<'_, E>,
    ) -> Result<Vec<Record<E>>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM records WHERE scope = ? AND kind = ? ORDER BY seq")
                .bind(&self.scope)
                .bind(E::KIND)
                .fetch_all(&self.pool)
                .await?;

        let mut records = Vec::new();
        for (body,) in rows {
            let record: Record<E> = serde_json::from_str(&body)?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn dequeue_operations(&self) -> Result<Vec<PendingOperation<E>>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM pending_operations WHERE scope = ? AND kind = ? ORDER BY seq",
        )
        .bind(&self.scope)
        .bind(E::KIND)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).map_err(StoreError::from))
            .collect()
    }

    async fn pending_operation(
        &self,
        id: &EntityId,
    ) -> Result<Option<PendingOperation<E>>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let op = self.load_operation::<E>(&mut tx, id).await?;
        tx.commit().await?;
        Ok(op)
    }

    async fn resolve_alias(&self, id: &EntityId) -> Result<Option<EntityId>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT server_id FROM id_aliases WHERE scope = ? AND kind = ? AND placeholder_id = ?",
        )
        .bind(&self.scope)
        .bind(E::KIND)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(server_id,)| EntityId::new(server_id)))
    }
}

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn outbox_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, entity_kind, entity_id, payload, attempts, last_error, created_at
            FROM outbox WHERE scope = ? ORDER BY seq LIMIT ?
            "#,
        )
        .bind(&self.scope)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxRow::into_message).collect()
    }

    async fn record_outbox_failure(&self, id: &str, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, last_error = ? WHERE scope = ? AND id = ?",
        )
        .bind(error)
        .bind(&self.scope)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_outbox_message(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM outbox WHERE scope = ? AND id = ?")
            .bind(&self.scope)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
