//! Offline-first sync machinery.
//!
//! Mutations flow through the [`SyncCoordinator`]: it tries the
//! [`RemoteGateway`] first and falls back to the [`LocalStore`] replay queue
//! when the backend is unreachable. Queued operations are coalesced per
//! entity id and replayed one at a time, oldest first.

mod coordinator;
mod credentials;
mod error;
mod gateway;
mod operation;
mod outbox;
mod policy;
mod store;

pub use coordinator::{DeleteOutcome, ReplayReport, SyncCoordinator, SyncStats};
pub use credentials::{Credential, CredentialProvider, SessionCredentials, StaticCredentials};
pub use error::{GatewayError, ServiceError, StoreError};
pub use gateway::{HttpGateway, RemoteGateway};
pub use operation::{coalesce, Operation, OperationKind, PendingOperation};
pub use outbox::{DrainReport, Enricher, EnrichmentWorker, HttpEnricher, OutboxMessage};
pub use policy::SyncPolicy;
pub use store::{
    open_database, Commit, LocalStore, MemoryStore, OutboxStore, QueueChange, RecordPredicate,
    SqliteStore,
};
