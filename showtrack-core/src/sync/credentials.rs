//! Bearer credentials for backend calls.
//!
//! Authentication itself happens elsewhere; the sync layer only asks a
//! [`CredentialProvider`] for the current token and refuses to touch the
//! network without one.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::RwLock;

use super::error::GatewayError;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub trait CredentialProvider: Send + Sync {
    fn current_credential(&self) -> Option<Credential>;

    fn is_valid(&self) -> bool {
        self.current_credential()
            .is_some_and(|c| !c.token.is_empty() && !c.is_expired())
    }

    /// Token to attach, or `Unauthenticated` when none is usable.
    fn bearer_token(&self) -> Result<String, GatewayError> {
        match self.current_credential() {
            Some(c) if !c.token.is_empty() && !c.is_expired() => Ok(c.token),
            _ => Err(GatewayError::Unauthenticated),
        }
    }
}

/// A fixed API key, as read from the config file.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Option<Credential>);

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()).map(Credential::new))
    }
}

impl CredentialProvider for StaticCredentials {
    fn current_credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Credential that can be swapped at runtime on sign-in and sign-out.
#[derive(Debug, Default)]
pub struct SessionCredentials {
    current: RwLock<Option<Credential>>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, credential: Credential) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(credential);
    }

    pub fn sign_out(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }
}

impl CredentialProvider for SessionCredentials {
    fn current_credential(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
