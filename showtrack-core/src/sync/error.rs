//! Error taxonomy for the offline-sync layer.
//!
//! Three sources of failure are kept apart: caller input
//! ([`ValidationError`]), the device's own storage ([`StoreError`]) and the
//! backend ([`GatewayError`]). Only some gateway errors are transient; those
//! are absorbed into the replay queue instead of reaching the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::entity::ValidationError;
use crate::models::EntityId;

/// Local persistence failure. Never retried automatically.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error for {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("stored data could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} is deleted; no further changes are accepted")]
    Deleted(EntityId),
}

/// Failure reported by the remote gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("not signed in: no valid credential")]
    Unauthenticated,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::NetworkUnavailable(_) | GatewayError::Timeout(_) => true,
            GatewayError::Server { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            GatewayError::Unauthenticated | GatewayError::InvalidResponse(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Server { status: 404, .. })
    }
}

/// Error surfaced by the entity services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("storage fault: {0}")]
    Storage(StoreError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: EntityId },

    #[error("{0} has been deleted")]
    Deleted(EntityId),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Deleted(id) => ServiceError::Deleted(id),
            other => ServiceError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: u16) -> GatewayError {
        GatewayError::Server {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::NetworkUnavailable("dns".into()).is_transient());
        assert!(GatewayError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(server(500).is_transient());
        assert!(server(503).is_transient());
        assert!(server(429).is_transient());

        assert!(!server(400).is_transient());
        assert!(!server(422).is_transient());
        assert!(!GatewayError::Unauthenticated.is_transient());
        assert!(!GatewayError::InvalidResponse("not json".into()).is_transient());
    }

    #[test]
    fn test_not_found() {
        assert!(server(404).is_not_found());
        assert!(!server(410).is_not_found());
    }

    #[test]
    fn test_deleted_store_error_maps_to_service_deleted() {
        let err: ServiceError = StoreError::Deleted(EntityId::from("e1")).into();
        assert!(matches!(err, ServiceError::Deleted(id) if id.as_str() == "e1"));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(server(422).to_string(), "server returned 422: boom");
        let err = ServiceError::NotFound {
            kind: "journal_entries",
            id: EntityId::from("x"),
        };
        assert_eq!(err.to_string(), "journal_entries x not found");
    }
}
