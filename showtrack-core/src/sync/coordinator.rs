//! The sync coordinator.
//!
//! Every mutation goes through here. The coordinator tries the backend first
//! within [`SyncPolicy::write_budget`]; transient failures are absorbed into
//! the replay queue and the locally applied record is returned, permanent
//! ones are surfaced without touching the queue.
//!
//! Per entity the observable state is derived from the record's
//! `sync_status` and its queue entry:
//!
//! - synced: no queue entry
//! - pending local: queued, `attempt_count == 0`
//! - retrying: queued, `0 < attempt_count < max_attempts`
//! - error: queued, `attempt_count >= max_attempts`; left alone by replay
//!   until [`SyncCoordinator::retry_failed`] resets it
//!
//! Work on one entity id is serialized by a per-id async lock, and replays
//! are serialized by a coordinator-wide lock, so an operation is never in
//! flight twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use super::error::{GatewayError, ServiceError, StoreError};
use super::gateway::RemoteGateway;
use super::operation::{Operation, PendingOperation};
use super::outbox::OutboxMessage;
use super::policy::SyncPolicy;
use super::store::{Commit, LocalStore, OutboxStore};
use crate::entity::{SyncEntity, ValidationError};
use crate::models::{EntityId, Record, RemoteRecord, SyncStatus};

/// What one replay cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub attempted: usize,
    pub synced: usize,
    /// Transient failures that will be retried next cycle.
    pub failed: usize,
    /// Operations that reached `max_attempts` during this cycle.
    pub exhausted: usize,
    /// Operations already in the error state.
    pub skipped: usize,
    /// The cycle stopped early because no credential was available.
    pub halted: bool,
}

impl ReplayReport {
    pub fn merge(&mut self, other: &ReplayReport) {
        self.attempted += other.attempted;
        self.synced += other.synced;
        self.failed += other.failed;
        self.exhausted += other.exhausted;
        self.skipped += other.skipped;
        self.halted |= other.halted;
    }
}

/// Queue counters for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub pending: usize,
    pub retrying: usize,
    pub error: usize,
    pub outbox: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The backend confirmed the delete.
    Confirmed,
    /// The delete is queued for replay.
    Pending,
}

enum Attempt<T> {
    Done(T),
    Failed(GatewayError),
    Cancelled,
}

enum Step {
    Synced,
    Failed,
    Exhausted,
    Halt,
}

/// Per-id async locks, dropped from the map once nobody holds them.
#[derive(Default)]
struct EntityLocks {
    locks: Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    async fn lock(&self, id: &EntityId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

pub struct SyncCoordinator<E: SyncEntity> {
    store: Arc<dyn LocalStore<E>>,
    gateway: Arc<dyn RemoteGateway<E>>,
    outbox: Option<Arc<dyn OutboxStore>>,
    policy: SyncPolicy,
    locks: EntityLocks,
    replay_lock: AsyncMutex<()>,
    wake: Notify,
}

impl<E: SyncEntity> SyncCoordinator<E> {
    pub fn new(
        store: Arc<dyn LocalStore<E>>,
        gateway: Arc<dyn RemoteGateway<E>>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            outbox: None,
            policy,
            locks: EntityLocks::default(),
            replay_lock: AsyncMutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Lets [`status`](Self::status) report the outbox depth.
    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxStore>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    async fn resolve(&self, id: &EntityId) -> Result<EntityId, StoreError> {
        Ok(self.store.resolve_alias(id).await?.unwrap_or_else(|| id.clone()))
    }

    /// Locks the current id for `id`, following placeholder aliases. The
    /// alias is checked again once the lock is held since a replay may have
    /// swapped the id while we waited.
    async fn lock_resolved(
        &self,
        id: &EntityId,
    ) -> Result<(EntityId, OwnedMutexGuard<()>), StoreError> {
        let mut current = self.resolve(id).await?;
        loop {
            let guard = self.locks.lock(&current).await;
            let resolved = self.resolve(&current).await?;
            if resolved == current {
                return Ok((current, guard));
            }
            current = resolved;
        }
    }

    async fn within_budget<T>(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Attempt<T> {
        let budget = self.policy.write_budget;
        tokio::select! {
            _ = cancel.cancelled() => Attempt::Cancelled,
            result = tokio::time::timeout(budget, call) => match result {
                Ok(Ok(value)) => Attempt::Done(value),
                Ok(Err(e)) => Attempt::Failed(e),
                Err(_) => Attempt::Failed(GatewayError::Timeout(budget)),
            },
        }
    }

    fn enrichment(&self, record: &Record<E>) -> Result<Option<OutboxMessage>, StoreError> {
        if E::ENRICH {
            Ok(Some(OutboxMessage::enrichment(record)?))
        } else {
            Ok(None)
        }
    }

    /// Creates `payload`, remotely if possible.
    ///
    /// The payload must already be validated.
    pub async fn create(
        &self,
        payload: E,
        cancel: &CancellationToken,
    ) -> Result<Record<E>, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        let record = Record::new_local(payload);

        match self
            .within_budget(cancel, self.gateway.create(&record.payload))
            .await
        {
            Attempt::Done(remote) => {
                let confirmed = record.confirmed_by(remote);
                let mut commit = Commit::new().put(confirmed.clone());
                if let Some(message) = self.enrichment(&confirmed)? {
                    commit = commit.outbox(message);
                }
                self.store.commit(commit).await?;
                tracing::info!(kind = E::KIND, id = %confirmed.id, "created");
                Ok(confirmed)
            }
            Attempt::Failed(e) if e.is_transient() => {
                self.store
                    .commit(
                        Commit::new()
                            .put(record.clone())
                            .enqueue(PendingOperation::create(&record).with_error(&e)),
                    )
                    .await?;
                tracing::info!(kind = E::KIND, id = %record.id, error = %e, "create queued");
                Ok(record)
            }
            Attempt::Failed(e) => Err(e.into()),
            Attempt::Cancelled => Err(ServiceError::Cancelled),
        }
    }

    /// Loads the record to mutate, fetching it from the backend when it is
    /// not cached.
    async fn load_for_write(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> Result<Record<E>, ServiceError> {
        if let Some(op) = self.store.pending_operation(id).await? {
            if matches!(op.operation, Operation::Delete) {
                return Err(ServiceError::Deleted(id.clone()));
            }
        }
        if let Some(record) = self.store.get(id).await? {
            if record.deleted {
                return Err(ServiceError::Deleted(id.clone()));
            }
            return Ok(record);
        }
        if id.is_local() {
            return Err(ServiceError::NotFound {
                kind: E::KIND,
                id: id.clone(),
            });
        }

        match self.within_budget(cancel, self.gateway.get(id)).await {
            Attempt::Done(remote) => {
                let record = Record::from_remote(remote);
                self.store.put(&record).await?;
                Ok(record)
            }
            Attempt::Failed(e) if e.is_not_found() => Err(ServiceError::NotFound {
                kind: E::KIND,
                id: id.clone(),
            }),
            Attempt::Failed(e) => Err(e.into()),
            Attempt::Cancelled => Err(ServiceError::Cancelled),
        }
    }

    /// Applies `edit` to the current payload and syncs the result.
    ///
    /// The edited payload is validated before anything is written.
    pub async fn update<F>(
        &self,
        id: &EntityId,
        edit: F,
        cancel: &CancellationToken,
    ) -> Result<Record<E>, ServiceError>
    where
        F: FnOnce(&mut E) -> Result<(), ValidationError> + Send,
    {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        let (id, _guard) = self.lock_resolved(id).await?;
        let current = self.load_for_write(&id, cancel).await?;

        let mut payload = current.payload.clone();
        edit(&mut payload)?;
        payload.validate()?;
        let mut record = current;
        record.mutate(payload);

        // Anything already queued for this id has to reach the server first.
        let queued = self.store.pending_operation(&id).await?;
        if queued.is_some() || id.is_local() {
            self.store
                .commit(
                    Commit::new()
                        .put(record.clone())
                        .enqueue(PendingOperation::update(&record)),
                )
                .await?;
            tracing::debug!(kind = E::KIND, %id, "update coalesced into queued operation");
            return Ok(record);
        }

        match self
            .within_budget(cancel, self.gateway.update(&id, &record.payload))
            .await
        {
            Attempt::Done(remote) => {
                let confirmed = record.confirmed_by(remote);
                self.store.put(&confirmed).await?;
                tracing::info!(kind = E::KIND, %id, version = confirmed.version, "updated");
                Ok(confirmed)
            }
            Attempt::Failed(e) if e.is_transient() => {
                self.store
                    .commit(
                        Commit::new()
                            .put(record.clone())
                            .enqueue(PendingOperation::update(&record).with_error(&e)),
                    )
                    .await?;
                tracing::info!(kind = E::KIND, %id, error = %e, "update queued");
                Ok(record)
            }
            Attempt::Failed(e) => Err(e.into()),
            Attempt::Cancelled => Err(ServiceError::Cancelled),
        }
    }

    pub async fn delete(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> Result<DeleteOutcome, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        let (id, _guard) = self.lock_resolved(id).await?;

        let Some(mut record) = self.store.get(&id).await? else {
            return self.delete_uncached(&id, cancel).await;
        };
        if record.deleted {
            return Err(ServiceError::Deleted(id));
        }
        record.mark_deleted();

        let queued = self.store.pending_operation(&id).await?;
        if queued.is_some() || id.is_local() {
            self.store
                .commit(
                    Commit::new()
                        .put(record.clone())
                        .enqueue(PendingOperation::delete(&record)),
                )
                .await?;
            tracing::debug!(kind = E::KIND, %id, "delete coalesced into queued operation");
            return Ok(DeleteOutcome::Pending);
        }

        match self.within_budget(cancel, self.gateway.delete(&id)).await {
            Attempt::Done(()) => {
                self.store
                    .commit(Commit::new().remove(id.clone()).dequeue(id.clone()))
                    .await?;
                tracing::info!(kind = E::KIND, %id, "deleted");
                Ok(DeleteOutcome::Confirmed)
            }
            Attempt::Failed(e) if e.is_transient() => {
                self.store
                    .commit(
                        Commit::new()
                            .put(record.clone())
                            .enqueue(PendingOperation::delete(&record).with_error(&e)),
                    )
                    .await?;
                tracing::info!(kind = E::KIND, %id, error = %e, "delete queued");
                Ok(DeleteOutcome::Pending)
            }
            Attempt::Failed(e) => Err(e.into()),
            Attempt::Cancelled => Err(ServiceError::Cancelled),
        }
    }

    async fn delete_uncached(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> Result<DeleteOutcome, ServiceError> {
        if let Some(op) = self.store.pending_operation(id).await? {
            if matches!(op.operation, Operation::Delete) {
                return Err(ServiceError::Deleted(id.clone()));
            }
        }
        if id.is_local() {
            return Err(ServiceError::NotFound {
                kind: E::KIND,
                id: id.clone(),
            });
        }

        match self.within_budget(cancel, self.gateway.delete(id)).await {
            Attempt::Done(()) => Ok(DeleteOutcome::Confirmed),
            Attempt::Failed(e) if e.is_transient() => {
                self.store
                    .enqueue_operation(PendingOperation::delete_remote(id.clone()).with_error(&e))
                    .await?;
                tracing::info!(kind = E::KIND, %id, error = %e, "delete queued");
                Ok(DeleteOutcome::Pending)
            }
            Attempt::Failed(e) => Err(e.into()),
            Attempt::Cancelled => Err(ServiceError::Cancelled),
        }
    }

    /// Replays the queue once, oldest operation first.
    ///
    /// Operations in the error state are skipped. A missing credential stops
    /// the cycle without charging an attempt to anything.
    pub async fn replay(&self) -> Result<ReplayReport, StoreError> {
        let _replaying = self.replay_lock.lock().await;
        let mut report = ReplayReport::default();

        for queued in self.store.dequeue_operations().await? {
            if queued.is_exhausted(self.policy.max_attempts) {
                report.skipped += 1;
                continue;
            }

            let guard = self.locks.lock(&queued.target_id).await;
            // The entry may have been coalesced or removed since the queue
            // was read.
            let Some(op) = self.store.pending_operation(&queued.target_id).await? else {
                continue;
            };
            if op.is_exhausted(self.policy.max_attempts) {
                report.skipped += 1;
                continue;
            }

            match self.replay_one(op).await? {
                Step::Synced => report.synced += 1,
                Step::Failed => report.failed += 1,
                Step::Exhausted => report.exhausted += 1,
                Step::Halt => {
                    report.halted = true;
                    break;
                }
            }
            report.attempted += 1;
            drop(guard);
            tokio::task::yield_now().await;
        }

        if report.attempted > 0 || report.halted {
            tracing::info!(
                kind = E::KIND,
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                exhausted = report.exhausted,
                halted = report.halted,
                "replay finished"
            );
        }
        Ok(report)
    }

    async fn replay_one(&self, op: PendingOperation<E>) -> Result<Step, StoreError> {
        let id = op.target_id.clone();
        let result = match &op.operation {
            Operation::Create(payload) => self.gateway.create(payload).await.map(Some),
            Operation::Update(payload) => self.gateway.update(&id, payload).await.map(Some),
            // A placeholder never reached the server; there is nothing to delete.
            Operation::Delete if id.is_local() => Ok(None),
            Operation::Delete => self.gateway.delete(&id).await.map(|()| None),
        };

        match result {
            Ok(remote) => {
                self.confirm(&op, remote).await?;
                Ok(Step::Synced)
            }
            Err(GatewayError::Unauthenticated) => {
                tracing::warn!(kind = E::KIND, %id, "replay halted: not signed in");
                Ok(Step::Halt)
            }
            Err(e) => self.record_failure(op, e).await,
        }
    }

    async fn confirm(
        &self,
        op: &PendingOperation<E>,
        remote: Option<RemoteRecord<E>>,
    ) -> Result<(), StoreError> {
        let id = &op.target_id;
        let Some(remote) = remote else {
            self.store
                .commit(Commit::new().remove(id.clone()).dequeue(id.clone()))
                .await?;
            tracing::info!(kind = E::KIND, %id, "replayed delete");
            return Ok(());
        };

        let confirmed = match self.store.get(id).await? {
            Some(local) => local.confirmed_by(remote),
            None => {
                let mut record = Record::from_remote(remote);
                record.version = record.version.max(op.version);
                record
            }
        };

        let mut commit = Commit::new()
            .remove(id.clone())
            .put(confirmed.clone())
            .dequeue(id.clone());
        if confirmed.id != *id {
            commit = commit.alias(id.clone(), confirmed.id.clone());
        }
        if matches!(op.operation, Operation::Create(_)) {
            if let Some(message) = self.enrichment(&confirmed)? {
                commit = commit.outbox(message);
            }
        }
        self.store.commit(commit).await?;

        tracing::info!(
            kind = E::KIND,
            id = %confirmed.id,
            from = %id,
            operation = %op.kind(),
            "replayed"
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        op: PendingOperation<E>,
        error: GatewayError,
    ) -> Result<Step, StoreError> {
        let max = self.policy.max_attempts;
        let attempt = if error.is_transient() {
            op.attempt_count.saturating_add(1)
        } else {
            max
        };
        let exhausted = attempt >= max;

        let id = op.target_id.clone();
        let mut failed = op.with_error(&error);
        failed.attempt_count = attempt;

        let mut commit = Commit::new().replace_operation(failed);
        if exhausted {
            if let Some(mut record) = self.store.get(&id).await? {
                record.sync_status = SyncStatus::Error;
                commit = commit.put(record);
            }
        }
        self.store.commit(commit).await?;

        if exhausted {
            tracing::warn!(kind = E::KIND, %id, attempt, error = %error, "giving up until retried");
            Ok(Step::Exhausted)
        } else {
            tracing::warn!(kind = E::KIND, %id, attempt, error = %error, "replay failed");
            Ok(Step::Failed)
        }
    }

    /// Resets an operation in the error state so replay picks it up again.
    ///
    /// Returns false when nothing is queued for `id` or it is not failed.
    pub async fn retry_failed(&self, id: &EntityId) -> Result<bool, StoreError> {
        let (id, _guard) = self.lock_resolved(id).await?;
        let reset = self.reset(&id).await?;
        if reset {
            self.wake();
        }
        Ok(reset)
    }

    pub async fn retry_all_failed(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for op in self.store.dequeue_operations().await? {
            if !op.is_exhausted(self.policy.max_attempts) {
                continue;
            }
            let _guard = self.locks.lock(&op.target_id).await;
            if self.reset(&op.target_id).await? {
                count += 1;
            }
        }
        if count > 0 {
            self.wake();
        }
        Ok(count)
    }

    async fn reset(&self, id: &EntityId) -> Result<bool, StoreError> {
        let Some(mut op) = self.store.pending_operation(id).await? else {
            return Ok(false);
        };
        if !op.is_exhausted(self.policy.max_attempts) {
            return Ok(false);
        }
        op.attempt_count = 0;

        let mut commit = Commit::new().replace_operation(op);
        if let Some(mut record) = self.store.get(id).await? {
            record.sync_status = SyncStatus::Pending;
            commit = commit.put(record);
        }
        self.store.commit(commit).await?;
        tracing::info!(kind = E::KIND, %id, "reset for retry");
        Ok(true)
    }

    /// Caches a record fetched from the backend.
    ///
    /// A local copy with unsynced changes wins over the server's.
    pub async fn cache_remote(&self, remote: RemoteRecord<E>) -> Result<Record<E>, StoreError> {
        let _guard = self.locks.lock(&remote.id).await;
        let record = match self.store.get(&remote.id).await? {
            Some(local) if local.sync_status != SyncStatus::Synced || local.deleted => {
                return Ok(local);
            }
            Some(local) => local.confirmed_by(remote),
            None => Record::from_remote(remote),
        };
        self.store.put(&record).await?;
        Ok(record)
    }

    /// Drops a synced cache entry the backend no longer has.
    pub async fn evict(&self, id: &EntityId) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        if self.store.pending_operation(id).await?.is_some() {
            return Ok(());
        }
        if let Some(local) = self.store.get(id).await? {
            if local.sync_status == SyncStatus::Synced {
                self.store.remove(id).await?;
                tracing::debug!(kind = E::KIND, %id, "evicted");
            }
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<SyncStats, StoreError> {
        let mut stats = SyncStats::default();
        for op in self.store.dequeue_operations().await? {
            match op.attempt_count {
                0 => stats.pending += 1,
                n if n < self.policy.max_attempts => stats.retrying += 1,
                _ => stats.error += 1,
            }
        }
        if let Some(outbox) = &self.outbox {
            stats.outbox = outbox.outbox_messages(usize::MAX).await?.len();
        }
        Ok(stats)
    }

    /// Cuts the background loop's sleep short ("connectivity restored").
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Replays until `cancel` fires, sleeping `poll_interval` between clean
    /// cycles and backing off after failing ones.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut failing_cycles = 0u32;
        loop {
            match self.replay().await {
                Ok(report) if report.failed > 0 || report.halted => {
                    failing_cycles = failing_cycles.saturating_add(1);
                }
                Ok(_) => failing_cycles = 0,
                Err(e) => {
                    tracing::error!(kind = E::KIND, error = %e, "replay aborted");
                    failing_cycles = failing_cycles.saturating_add(1);
                }
            }

            let delay = self.policy.backoff(failing_cycles);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!(kind = E::KIND, "sync loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JournalCategory, JournalEntry};
    use crate::sync::store::MemoryStore;
    use crate::testing::{CallKind, FakeGateway};
    use std::time::Duration;

    struct Harness {
        store: MemoryStore,
        gateway: Arc<FakeGateway<JournalEntry>>,
        coordinator: Arc<SyncCoordinator<JournalEntry>>,
    }

    fn harness(gateway: FakeGateway<JournalEntry>) -> Harness {
        let store = MemoryStore::new();
        let gateway = Arc::new(gateway);
        let coordinator = Arc::new(
            SyncCoordinator::new(
                Arc::new(store.clone()),
                gateway.clone(),
                SyncPolicy::default(),
            )
            .with_outbox(Arc::new(store.clone())),
        );
        Harness {
            store,
            gateway,
            coordinator,
        }
    }

    fn entry(title: &str) -> JournalEntry {
        JournalEntry::new(title, JournalCategory::DailyCare)
    }

    fn offline() -> GatewayError {
        GatewayError::NetworkUnavailable("offline".to_string())
    }

    async fn queue(h: &Harness) -> Vec<PendingOperation<JournalEntry>> {
        h.store.dequeue_operations().await.unwrap()
    }

    async fn local(h: &Harness, id: &EntityId) -> Option<Record<JournalEntry>> {
        LocalStore::<JournalEntry>::get(&h.store, id).await.unwrap()
    }

    #[tokio::test]
    async fn test_online_create_is_synced_and_enqueues_enrichment() {
        let h = harness(FakeGateway::new());
        let record = h
            .coordinator
            .create(entry("Feed check"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert!(!record.id.is_local());
        assert_eq!(record.owner_id.as_deref(), Some("student-1"));
        assert!(queue(&h).await.is_empty());
        assert_eq!(h.store.outbox_messages(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_create_then_reconnect() {
        let h = harness(FakeGateway::offline());
        let record = h
            .coordinator
            .create(entry("Feed check"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert!(record.id.is_local());
        assert_eq!(queue(&h).await.len(), 1);
        assert!(h.store.outbox_messages(10).await.unwrap().is_empty());

        h.gateway.heal();
        h.gateway.clear_calls();
        let report = h.coordinator.replay().await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(h.gateway.count(CallKind::Create), 1);
        assert!(queue(&h).await.is_empty());
        assert!(local(&h, &record.id).await.is_none());

        let server_id = LocalStore::<JournalEntry>::resolve_alias(&h.store, &record.id)
            .await
            .unwrap()
            .unwrap();
        let synced = local(&h, &server_id).await.unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.payload.title, "Feed check");
        assert_eq!(h.store.outbox_messages(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_surfaced_and_not_queued() {
        let h = harness(FakeGateway::new());
        h.gateway.fail_next(GatewayError::Server {
            status: 422,
            message: "category rejected".to_string(),
        });

        let err = h
            .coordinator
            .create(entry("Feed check"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Gateway(GatewayError::Server { status: 422, .. })));
        assert!(queue(&h).await.is_empty());

        h.gateway.fail_next(GatewayError::Unauthenticated);
        let err = h
            .coordinator
            .create(entry("Feed check"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Gateway(GatewayError::Unauthenticated)));
        assert!(queue(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_backend_defers_after_write_budget() {
        let store = MemoryStore::new();
        let gateway = Arc::new(FakeGateway::<JournalEntry>::new().with_delay(Duration::from_millis(200)));
        let policy = SyncPolicy {
            write_budget: Duration::from_millis(20),
            ..SyncPolicy::default()
        };
        let coordinator = SyncCoordinator::new(Arc::new(store.clone()), gateway, policy);

        let record = coordinator
            .create(entry("Feed check"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);

        let queued: Vec<PendingOperation<JournalEntry>> = store.dequeue_operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_io_has_no_effect() {
        let h = harness(FakeGateway::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.coordinator.create(entry("Feed check"), &cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
        assert!(h.gateway.calls().is_empty());
        assert!(queue(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_edits_coalesce_into_single_delete() {
        let h = harness(FakeGateway::offline());
        let cancel = CancellationToken::new();
        let record = h.coordinator.create(entry("v1"), &cancel).await.unwrap();

        for title in ["v2", "v3"] {
            h.coordinator
                .update(
                    &record.id,
                    |e| {
                        e.title = title.to_string();
                        Ok(())
                    },
                    &cancel,
                )
                .await
                .unwrap();
            let q = queue(&h).await;
            assert_eq!(q.len(), 1);
            assert_eq!(q[0].operation, Operation::Create(entry(title)));
        }

        let outcome = h.coordinator.delete(&record.id, &cancel).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Pending);
        let q = queue(&h).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].operation, Operation::Delete);

        // Deletion is terminal.
        let err = h
            .coordinator
            .update(&record.id, |_| Ok(()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Deleted(_)));

        // The placeholder never reached the server, so replay resolves it locally.
        h.gateway.heal();
        h.gateway.clear_calls();
        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(h.gateway.calls().is_empty());
        assert!(queue(&h).await.is_empty());
        assert!(local(&h, &record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_max_retries_parks_one_entity_without_blocking_others() {
        let h = harness(FakeGateway::offline());
        let cancel = CancellationToken::new();
        let poisoned = h.coordinator.create(entry("poison"), &cancel).await.unwrap();
        let healthy = h.coordinator.create(entry("healthy"), &cancel).await.unwrap();

        h.gateway.heal();
        h.gateway.fail_where(|call| {
            let poisoned = call.payload.as_ref().is_some_and(|p| p.title == "poison");
            poisoned.then(|| GatewayError::Server {
                status: 503,
                message: "unavailable".to_string(),
            })
        });
        h.gateway.clear_calls();

        let first = h.coordinator.replay().await.unwrap();
        assert_eq!(first.synced, 1);
        assert_eq!(first.failed, 1);
        assert!(LocalStore::<JournalEntry>::resolve_alias(&h.store, &healthy.id)
            .await
            .unwrap()
            .is_some());

        for _ in 0..4 {
            h.coordinator.replay().await.unwrap();
        }
        assert_eq!(h.gateway.count(CallKind::Create), 6);

        let parked = local(&h, &poisoned.id).await.unwrap();
        assert_eq!(parked.sync_status, SyncStatus::Error);
        let q = queue(&h).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].attempt_count, 5);

        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(h.gateway.count(CallKind::Create), 6);

        let stats = h.coordinator.status().await.unwrap();
        assert_eq!(stats.error, 1);
        assert_eq!(stats.outbox, 1);
    }

    #[tokio::test]
    async fn test_retry_failed_resets_to_pending() {
        let h = harness(FakeGateway::offline());
        let cancel = CancellationToken::new();
        let record = h.coordinator.create(entry("Feed check"), &cancel).await.unwrap();

        h.gateway.heal();
        h.gateway.fail_next(GatewayError::Server {
            status: 400,
            message: "bad".to_string(),
        });
        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(local(&h, &record.id).await.unwrap().sync_status, SyncStatus::Error);

        assert!(h.coordinator.retry_failed(&record.id).await.unwrap());
        assert_eq!(local(&h, &record.id).await.unwrap().sync_status, SyncStatus::Pending);
        assert_eq!(queue(&h).await[0].attempt_count, 0);

        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(!h.coordinator.retry_failed(&record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_credential_halts_replay_without_charging_attempts() {
        let h = harness(FakeGateway::offline());
        let cancel = CancellationToken::new();
        h.coordinator.create(entry("a"), &cancel).await.unwrap();
        h.coordinator.create(entry("b"), &cancel).await.unwrap();

        h.gateway.fail_always(GatewayError::Unauthenticated);
        h.gateway.clear_calls();
        let report = h.coordinator.replay().await.unwrap();

        assert!(report.halted);
        assert_eq!(report.attempted, 0);
        assert_eq!(h.gateway.calls().len(), 1);
        assert!(queue(&h).await.iter().all(|op| op.attempt_count == 0));
    }

    #[tokio::test]
    async fn test_replays_never_overlap() {
        let store = MemoryStore::new();
        let gateway = Arc::new(FakeGateway::<JournalEntry>::offline());
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(store.clone()),
            gateway.clone(),
            SyncPolicy::default(),
        ));
        let cancel = CancellationToken::new();
        for i in 0..4 {
            coordinator.create(entry(&format!("e{}", i)), &cancel).await.unwrap();
        }

        let slow = Arc::new(FakeGateway::<JournalEntry>::new().with_delay(Duration::from_millis(5)));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(store.clone()),
            slow.clone(),
            SyncPolicy::default(),
        ));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let c = coordinator.clone();
                tokio::spawn(async move { c.replay().await.unwrap() })
            })
            .collect();
        let mut total = ReplayReport::default();
        for report in futures::future::join_all(handles).await {
            total.merge(&report.unwrap());
        }

        assert_eq!(total.synced, 4);
        assert_eq!(slow.count(CallKind::Create), 4);
        assert_eq!(slow.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_update_while_create_queued_targets_placeholder_then_server_id() {
        let h = harness(FakeGateway::offline());
        let cancel = CancellationToken::new();
        let record = h.coordinator.create(entry("draft"), &cancel).await.unwrap();

        h.gateway.heal();
        h.coordinator.replay().await.unwrap();

        // The caller still holds the placeholder id.
        let updated = h
            .coordinator
            .update(
                &record.id,
                |e| {
                    e.content = "added later".to_string();
                    Ok(())
                },
                &cancel,
            )
            .await
            .unwrap();

        assert!(!updated.id.is_local());
        assert_eq!(updated.sync_status, SyncStatus::Synced);
        assert_eq!(h.gateway.count(CallKind::Update), 1);
        let sent = h
            .gateway
            .calls()
            .into_iter()
            .find(|c| c.kind == CallKind::Update)
            .unwrap();
        assert_eq!(sent.id.as_ref(), Some(&updated.id));
        assert_eq!(h.gateway.server_rows()[0].payload.content, "added later");
    }

    #[tokio::test]
    async fn test_version_never_decreases() {
        let h = harness(FakeGateway::offline());
        let cancel = CancellationToken::new();
        let record = h.coordinator.create(entry("v"), &cancel).await.unwrap();
        let mut max_seen = record.version;

        for i in 0..4 {
            let r = h
                .coordinator
                .update(
                    &record.id,
                    |e| {
                        e.title = format!("v{}", i);
                        Ok(())
                    },
                    &cancel,
                )
                .await
                .unwrap();
            assert!(r.version >= max_seen);
            max_seen = r.version;
        }

        h.gateway.heal();
        h.coordinator.replay().await.unwrap();
        let server_id = LocalStore::<JournalEntry>::resolve_alias(&h.store, &record.id)
            .await
            .unwrap()
            .unwrap();

        for i in 0..3 {
            h.gateway.edit_on_server(&server_id, entry(&format!("remote {}", i)));
            let remote = h.gateway.server_rows()[0].clone();
            let cached = h.coordinator.cache_remote(remote).await.unwrap();
            assert!(cached.version >= max_seen);
            max_seen = cached.version;
        }
        assert_eq!(local(&h, &server_id).await.unwrap().payload.title, "remote 2");
    }

    #[tokio::test]
    async fn test_delete_of_uncached_server_entity() {
        let h = harness(FakeGateway::new());
        let cancel = CancellationToken::new();
        let remote = h.gateway.seed(entry("on server"));

        h.gateway.fail_next(offline());
        let outcome = h.coordinator.delete(&remote.id, &cancel).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Pending);

        let err = h
            .coordinator
            .delete(&remote.id, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Deleted(_)));

        h.coordinator.replay().await.unwrap();
        assert!(h.gateway.server_rows().is_empty());
        assert!(queue(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_remote_keeps_unsynced_local_changes() {
        let h = harness(FakeGateway::new());
        let cancel = CancellationToken::new();
        let record = h.coordinator.create(entry("synced"), &cancel).await.unwrap();

        h.gateway.fail_always(offline());
        h.coordinator
            .update(
                &record.id,
                |e| {
                    e.title = "local edit".to_string();
                    Ok(())
                },
                &cancel,
            )
            .await
            .unwrap();

        let stale = RemoteRecord {
            id: record.id.clone(),
            owner_id: "student-1".to_string(),
            version: 1,
            updated_at: chrono::Utc::now(),
            payload: entry("server copy"),
        };
        let kept = h.coordinator.cache_remote(stale).await.unwrap();
        assert_eq!(kept.payload.title, "local edit");
        assert_eq!(kept.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_replays_on_wake_and_stops_on_cancel() {
        let h = harness(FakeGateway::offline());
        let record = h
            .coordinator
            .create(entry("Feed check"), &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task = {
            let c = h.coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { c.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue(&h).await.len(), 1);

        h.gateway.heal();
        h.coordinator.wake();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue(&h).await.is_empty());
        assert!(LocalStore::<JournalEntry>::resolve_alias(&h.store, &record.id)
            .await
            .unwrap()
            .is_some());

        cancel.cancel();
        task.await.unwrap();
    }
}
