//! In-memory record storage for the reference server.
//!
//! Rows are kept per entity kind as untyped JSON and decoded into the
//! entity type on the way out. Every row belongs to exactly one owner;
//! lookups by another owner behave as if the row does not exist.

use chrono::{DateTime, Utc};
use serde_json::Value;
use showtrack_core::{EntityId, RemoteRecord, SyncEntity};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRecord {
    id: String,
    owner_id: String,
    version: u64,
    updated_at: DateTime<Utc>,
    payload: Value,
}

impl StoredRecord {
    fn decode<E: SyncEntity>(&self) -> Result<RemoteRecord<E>, serde_json::Error> {
        Ok(RemoteRecord {
            id: EntityId::new(self.id.clone()),
            owner_id: self.owner_id.clone(),
            version: self.version,
            updated_at: self.updated_at,
            payload: serde_json::from_value(self.payload.clone())?,
        })
    }
}

/// An enrichment request accepted by the webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRequest {
    pub owner_id: String,
    pub entity_kind: String,
    pub entity_id: String,
}

#[derive(Default)]
struct Tables {
    /// kind -> rows in insertion order
    rows: HashMap<&'static str, Vec<StoredRecord>>,
    enrichments: Vec<EnrichmentRequest>,
}

#[derive(Default)]
pub struct ServerStorage {
    tables: RwLock<Tables>,
}

impl ServerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new row with a fresh id at version 1.
    pub async fn insert<E: SyncEntity>(
        &self,
        owner_id: &str,
        payload: &E,
    ) -> Result<RemoteRecord<E>, serde_json::Error> {
        let row = StoredRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            version: 1,
            updated_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        };
        let record = row.decode()?;

        let mut tables = self.tables.write().await;
        tables.rows.entry(E::KIND).or_default().push(row);
        Ok(record)
    }

    /// Replaces the payload and bumps the version. `None` if the caller
    /// owns no such row.
    pub async fn update<E: SyncEntity>(
        &self,
        owner_id: &str,
        id: &str,
        payload: &E,
    ) -> Result<Option<RemoteRecord<E>>, serde_json::Error> {
        let payload = serde_json::to_value(payload)?;

        let mut tables = self.tables.write().await;
        let Some(row) = tables
            .rows
            .get_mut(E::KIND)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id && r.owner_id == owner_id))
        else {
            return Ok(None);
        };

        row.payload = payload;
        row.version += 1;
        row.updated_at = Utc::now();
        row.decode().map(Some)
    }

    /// Returns false if the caller owns no such row.
    pub async fn remove<E: SyncEntity>(&self, owner_id: &str, id: &str) -> bool {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.rows.get_mut(E::KIND) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|r| !(r.id == id && r.owner_id == owner_id));
        rows.len() != before
    }

    pub async fn get<E: SyncEntity>(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<RemoteRecord<E>>, serde_json::Error> {
        let tables = self.tables.read().await;
        tables
            .rows
            .get(E::KIND)
            .and_then(|rows| rows.iter().find(|r| r.id == id && r.owner_id == owner_id))
            .map(StoredRecord::decode)
            .transpose()
    }

    /// The caller's rows matching `filter`, oldest first.
    pub async fn list<E: SyncEntity>(
        &self,
        owner_id: &str,
        filter: &E::Filter,
    ) -> Result<Vec<RemoteRecord<E>>, serde_json::Error> {
        let tables = self.tables.read().await;
        let mut records = Vec::new();
        for row in tables.rows.get(E::KIND).into_iter().flatten() {
            if row.owner_id != owner_id {
                continue;
            }
            let record = row.decode::<E>()?;
            if record.payload.matches_filter(filter) {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn record_enrichment(&self, request: EnrichmentRequest) {
        self.tables.write().await.enrichments.push(request);
    }

    pub async fn enrichment_requests(&self, owner_id: &str) -> Vec<EnrichmentRequest> {
        self.tables
            .read()
            .await
            .enrichments
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use showtrack_core::{
        AnimalFilter, AnimalRecord, JournalCategory, JournalEntry, JournalFilter, Species,
    };

    fn entry(title: &str, category: JournalCategory) -> JournalEntry {
        JournalEntry::new(title, category)
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_version() {
        let storage = ServerStorage::new();
        let record = storage
            .insert("owner-a", &entry("Weigh-in", JournalCategory::Health))
            .await
            .unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.owner_id, "owner-a");
        assert!(!record.id.is_local());
        assert_eq!(record.payload.title, "Weigh-in");
    }

    #[tokio::test]
    async fn test_update_increments_version() {
        let storage = ServerStorage::new();
        let created = storage
            .insert("owner-a", &entry("Weigh-in", JournalCategory::Health))
            .await
            .unwrap();

        let updated = storage
            .update(
                "owner-a",
                created.id.as_str(),
                &entry("Weigh-in (revised)", JournalCategory::Health),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.version, 2);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_rows_are_scoped_to_owner() {
        let storage = ServerStorage::new();
        let created = storage
            .insert("owner-a", &entry("Private", JournalCategory::Other))
            .await
            .unwrap();
        let id = created.id.as_str();

        assert!(storage.get::<JournalEntry>("owner-b", id).await.unwrap().is_none());
        assert!(storage
            .update("owner-b", id, &entry("Hijack", JournalCategory::Other))
            .await
            .unwrap()
            .is_none());
        assert!(!storage.remove::<JournalEntry>("owner-b", id).await);
        assert!(storage
            .list::<JournalEntry>("owner-b", &JournalFilter::default())
            .await
            .unwrap()
            .is_empty());

        assert!(storage.remove::<JournalEntry>("owner-a", id).await);
        assert!(storage.get::<JournalEntry>("owner-a", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kinds_are_isolated_and_filtered() {
        let storage = ServerStorage::new();
        storage
            .insert("owner-a", &entry("Feed", JournalCategory::Feeding))
            .await
            .unwrap();
        storage
            .insert("owner-a", &entry("Vet visit", JournalCategory::Veterinary))
            .await
            .unwrap();
        storage
            .insert("owner-a", &AnimalRecord::new("Daisy", Species::Cattle))
            .await
            .unwrap();

        let feeding = storage
            .list::<JournalEntry>(
                "owner-a",
                &JournalFilter {
                    category: Some(JournalCategory::Feeding),
                    ..JournalFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(feeding.len(), 1);
        assert_eq!(feeding[0].payload.title, "Feed");

        let animals = storage
            .list::<AnimalRecord>("owner-a", &AnimalFilter::default())
            .await
            .unwrap();
        assert_eq!(animals.len(), 1);
    }
}
