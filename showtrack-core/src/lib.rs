//! ShowTrack Core Library
//!
//! Entity models and the offline-first sync layer shared by the ShowTrack
//! CLI and reference server.

pub mod entity;
pub mod models;
pub mod service;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use entity::{SyncEntity, ValidationError};
pub use models::{
    AnimalFilter, AnimalPatch, AnimalRecord, EntityId, JournalCategory, JournalEntry,
    JournalEntryPatch, JournalFilter, Location, Metadata, Record, RemoteRecord, Species,
    SyncStatus, Weather,
};
pub use service::{AnimalService, EntityService, JournalService};
pub use sync::{
    CredentialProvider, DeleteOutcome, GatewayError, HttpGateway, MemoryStore, ReplayReport,
    ServiceError, SqliteStore, StaticCredentials, StoreError, SyncCoordinator, SyncPolicy,
    SyncStats,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
