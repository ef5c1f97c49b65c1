//! Public entity API: journal entries and animal records.
//!
//! [`EntityService`] validates input before any I/O, routes writes through
//! the [`SyncCoordinator`] and implements the cache-first read policy.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::entity::SyncEntity;
use crate::models::{AnimalRecord, EntityId, JournalEntry, Record, SyncStatus};
use crate::sync::{
    DeleteOutcome, LocalStore, OutboxStore, RemoteGateway, ReplayReport,
    ServiceError, SyncCoordinator, SyncPolicy, SyncStats,
};

pub type JournalService = EntityService<JournalEntry>;
pub type AnimalService = EntityService<AnimalRecord>;

pub struct EntityService<E: SyncEntity> {
    store: Arc<dyn LocalStore<E>>,
    gateway: Arc<dyn RemoteGateway<E>>,
    coordinator: Arc<SyncCoordinator<E>>,
}

impl<E: SyncEntity> EntityService<E> {
    pub fn new(
        store: Arc<dyn LocalStore<E>>,
        gateway: Arc<dyn RemoteGateway<E>>,
        policy: SyncPolicy,
    ) -> Self {
        let coordinator = SyncCoordinator::new(store.clone(), gateway.clone(), policy);
        Self::from_parts(store, gateway, coordinator)
    }

    /// Like [`new`](Self::new), with outbox depth reported by `status`.
    pub fn with_outbox(
        store: Arc<dyn LocalStore<E>>,
        gateway: Arc<dyn RemoteGateway<E>>,
        outbox: Arc<dyn OutboxStore>,
        policy: SyncPolicy,
    ) -> Self {
        let coordinator =
            SyncCoordinator::new(store.clone(), gateway.clone(), policy).with_outbox(outbox);
        Self::from_parts(store, gateway, coordinator)
    }

    fn from_parts(
        store: Arc<dyn LocalStore<E>>,
        gateway: Arc<dyn RemoteGateway<E>>,
        coordinator: SyncCoordinator<E>,
    ) -> Self {
        Self {
            store,
            gateway,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Shared handle for running the background loop.
    pub fn coordinator(&self) -> Arc<SyncCoordinator<E>> {
        self.coordinator.clone()
    }

    pub async fn create_entry(
        &self,
        payload: E,
        cancel: &CancellationToken,
    ) -> Result<Record<E>, ServiceError> {
        payload.validate()?;
        self.coordinator.create(payload, cancel).await
    }

    /// Returns the entity, from the cache when it can be trusted.
    ///
    /// A fresh synced copy, or one with unsynced local changes, is returned
    /// without a network call. Otherwise the backend is asked; if it cannot
    /// answer, the cached copy (if any) is returned instead of the error.
    pub async fn get_entry(&self, id: &EntityId) -> Result<Record<E>, ServiceError> {
        let id = self
            .store
            .resolve_alias(id)
            .await?
            .unwrap_or_else(|| id.clone());
        let cached = self.store.get(&id).await?;

        if let Some(record) = &cached {
            if record.deleted {
                return Err(ServiceError::Deleted(id));
            }
            let stale_after = self.coordinator.policy().stale_window();
            if record.sync_status != SyncStatus::Synced
                || record.is_fresh(stale_after)
                || id.is_local()
            {
                return Ok(record.clone());
            }
        } else if id.is_local() {
            return Err(self.not_found(id));
        }

        match self.gateway.get(&id).await {
            Ok(remote) => Ok(self.coordinator.cache_remote(remote).await?),
            Err(e) if e.is_not_found() => {
                self.coordinator.evict(&id).await?;
                Err(self.not_found(id))
            }
            Err(e) => match cached {
                Some(record) => {
                    tracing::debug!(kind = E::KIND, %id, error = %e, "serving cached copy");
                    Ok(record)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Lists entities matching `filter`, newest-first within the entity's
    /// natural order, refreshing the cache from the backend when reachable.
    pub async fn get_entries(
        &self,
        filter: &E::Filter,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Record<E>>, ServiceError> {
        match self.gateway.list(filter).await {
            Ok(rows) => {
                let mut seen = HashSet::with_capacity(rows.len());
                for remote in rows {
                    seen.insert(remote.id.clone());
                    self.coordinator.cache_remote(remote).await?;
                }
                self.evict_missing(filter, seen).await?;
            }
            Err(e) => {
                tracing::debug!(kind = E::KIND, error = %e, "listing from cache");
            }
        }

        let filter = filter.clone();
        let records = self
            .store
            .list_all(&move |r: &Record<E>| !r.deleted && r.payload.matches_filter(&filter))
            .await?;
        Ok(paginate(sorted(records), limit, offset))
    }

    /// Drops synced cache entries matching `filter` that the backend's
    /// listing no longer contains. Unsynced records are left alone.
    async fn evict_missing(
        &self,
        filter: &E::Filter,
        seen: HashSet<EntityId>,
    ) -> Result<(), ServiceError> {
        let filter = filter.clone();
        let missing = self
            .store
            .list_all(&move |r: &Record<E>| {
                r.sync_status == SyncStatus::Synced
                    && !r.deleted
                    && !r.id.is_local()
                    && r.payload.matches_filter(&filter)
                    && !seen.contains(&r.id)
            })
            .await?;
        for record in missing {
            self.coordinator.evict(&record.id).await?;
        }
        Ok(())
    }

    /// Applies `patch`, rejecting the result if it no longer validates.
    pub async fn update_entry(
        &self,
        id: &EntityId,
        patch: E::Patch,
        cancel: &CancellationToken,
    ) -> Result<Record<E>, ServiceError> {
        self.coordinator
            .update(
                id,
                move |payload| {
                    payload.apply_patch(patch);
                    Ok(())
                },
                cancel,
            )
            .await
    }

    pub async fn delete_entry(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> Result<DeleteOutcome, ServiceError> {
        self.coordinator.delete(id, cancel).await
    }

    /// Case-insensitive search over the local cache. Never touches the network.
    pub async fn search_entries(
        &self,
        query: &str,
        filter: &E::Filter,
    ) -> Result<Vec<Record<E>>, ServiceError> {
        let query = query.trim().to_lowercase();
        let filter = filter.clone();
        let records = self
            .store
            .list_all(&move |r: &Record<E>| {
                !r.deleted && r.payload.matches_filter(&filter) && r.payload.matches_query(&query)
            })
            .await?;
        Ok(sorted(records))
    }

    pub async fn retry_failed(&self, id: &EntityId) -> Result<bool, ServiceError> {
        Ok(self.coordinator.retry_failed(id).await?)
    }

    pub async fn retry_all_failed(&self) -> Result<usize, ServiceError> {
        Ok(self.coordinator.retry_all_failed().await?)
    }

    pub async fn sync_now(&self) -> Result<ReplayReport, ServiceError> {
        Ok(self.coordinator.replay().await?)
    }

    pub async fn status(&self) -> Result<SyncStats, ServiceError> {
        Ok(self.coordinator.status().await?)
    }

    fn not_found(&self, id: EntityId) -> ServiceError {
        ServiceError::NotFound { kind: E::KIND, id }
    }
}

fn sorted<E: SyncEntity>(mut records: Vec<Record<E>>) -> Vec<Record<E>> {
    records.sort_by(|a, b| {
        a.payload
            .ordering(&b.payload)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    records
}

fn paginate<T>(items: Vec<T>, limit: Option<usize>, offset: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}
