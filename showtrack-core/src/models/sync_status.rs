use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a local record stands relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Changed locally, not yet confirmed by the server.
    Pending,
    /// Confirmed by the server.
    Synced,
    /// Automatic retries exhausted; needs an explicit retry.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            _ => Err(format!(
                "Invalid sync status '{}'. Valid options: pending, synced, error",
                s
            )),
        }
    }
}
