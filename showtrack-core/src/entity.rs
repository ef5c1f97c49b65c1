//! The abstraction the sync machinery is generic over.
//!
//! Journal entries and animal records share one offline-sync implementation;
//! everything entity-specific (validation, patching, local filtering) sits
//! behind [`SyncEntity`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Debug;
use thiserror::Error;

/// Caller input that fails validation. Never retried, never queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// An entity type managed by the offline-sync pattern.
pub trait SyncEntity:
    Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static
{
    /// Storage namespace and REST collection name.
    const KIND: &'static str;

    /// Whether a confirmed create is followed by an AI enrichment request.
    const ENRICH: bool = false;

    /// Partial update applied by `update_entry`.
    type Patch: Debug + Send + Sync;

    /// List filter, sent as query parameters and also evaluated locally.
    type Filter: Serialize + Default + Clone + Debug + Send + Sync;

    fn validate(&self) -> Result<(), ValidationError>;

    fn apply_patch(&mut self, patch: Self::Patch);

    fn matches_filter(&self, filter: &Self::Filter) -> bool;

    /// Case-insensitive free-text match against the descriptive fields.
    fn matches_query(&self, query: &str) -> bool;

    /// Listing order. Ties are broken by most recent update.
    fn ordering(&self, _other: &Self) -> Ordering {
        Ordering::Equal
    }
}

pub(crate) fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

pub(crate) fn require_text(
    field: &str,
    value: &str,
    max_chars: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if value.chars().count() > max_chars {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_chars),
        ));
    }
    Ok(())
}
