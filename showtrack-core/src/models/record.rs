use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;
use super::sync_status::SyncStatus;

/// A locally held, versioned copy of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<E> {
    pub id: EntityId,
    /// Set by the server from the caller's credential. `None` until the
    /// first successful round-trip.
    pub owner_id: Option<String>,
    pub payload: E,
    pub sync_status: SyncStatus,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    /// Local tombstone while a delete waits for confirmation.
    #[serde(default)]
    pub deleted: bool,
}

/// Entity as the backend returns it: payload fields plus server-owned ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord<E> {
    pub id: EntityId,
    pub owner_id: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: E,
}

impl<E> Record<E> {
    /// A record created on the device, not yet seen by the server.
    pub fn new_local(payload: E) -> Self {
        Self {
            id: EntityId::local(),
            owner_id: None,
            payload,
            sync_status: SyncStatus::Pending,
            version: 1,
            updated_at: Utc::now(),
            synced_at: None,
            deleted: false,
        }
    }

    /// Builds a synced record straight from a server response.
    pub fn from_remote(remote: RemoteRecord<E>) -> Self {
        let now = Utc::now();
        Self {
            id: remote.id,
            owner_id: Some(remote.owner_id),
            payload: remote.payload,
            sync_status: SyncStatus::Synced,
            version: remote.version,
            updated_at: remote.updated_at,
            synced_at: Some(now),
            deleted: false,
        }
    }

    /// Applies a local mutation: new payload, bumped version, pending again.
    pub fn mutate(&mut self, payload: E) {
        self.payload = payload;
        self.touch();
    }

    /// Turns the record into a pending tombstone.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.touch();
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
        self.sync_status = SyncStatus::Pending;
    }

    /// Merges a server confirmation into this record.
    ///
    /// The server is authoritative for every field; the version only moves
    /// forward.
    pub fn confirmed_by(&self, remote: RemoteRecord<E>) -> Self {
        let version = self.version.max(remote.version);
        let mut record = Self::from_remote(remote);
        record.version = version;
        record
    }

    /// True when the record is synced and inside the staleness window.
    pub fn is_fresh(&self, stale_after: Option<Duration>) -> bool {
        if self.sync_status != SyncStatus::Synced || self.deleted {
            return false;
        }
        match (stale_after, self.synced_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(window), Some(synced_at)) => Utc::now() - synced_at < window,
        }
    }
}
