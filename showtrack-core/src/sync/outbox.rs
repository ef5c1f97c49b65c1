//! Enrichment outbox.
//!
//! When the backend confirms a new entity, the coordinator writes an
//! [`OutboxMessage`] in the same local commit. [`EnrichmentWorker`] delivers
//! those messages to the AI webhook on its own schedule, so a slow or failing
//! enrichment service can never fail or roll back the entity write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::credentials::CredentialProvider;
use super::error::{GatewayError, StoreError};
use super::gateway::{classify_request_error, error_from_response};
use super::store::OutboxStore;
use crate::entity::SyncEntity;
use crate::models::{EntityId, Record};

/// Messages fetched per drain pass.
const DRAIN_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub entity_kind: String,
    pub entity_id: EntityId,
    pub payload: Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Enrichment request for a record the server just confirmed.
    pub fn enrichment<E: SyncEntity>(record: &Record<E>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            entity_kind: E::KIND.to_string(),
            entity_id: record.id.clone(),
            payload: serde_json::to_value(&record.payload)?,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        })
    }
}

/// Delivers one outbox message.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, message: &OutboxMessage) -> Result<(), GatewayError>;
}

#[derive(Serialize)]
struct EnrichmentRequest<'a> {
    entity_kind: &'a str,
    entity_id: &'a EntityId,
    payload: &'a Value,
}

/// Posts enrichment requests to the AI processing webhook.
pub struct HttpEnricher {
    client: reqwest::Client,
    url: String,
    credentials: Arc<dyn CredentialProvider>,
    timeout: Duration,
}

impl HttpEnricher {
    /// `timeout` should be the long AI-processing timeout, not the data one.
    pub fn new(
        url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NetworkUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            credentials,
            timeout,
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, message: &OutboxMessage) -> Result<(), GatewayError> {
        let token = self.credentials.bearer_token()?;
        let body = EnrichmentRequest {
            entity_kind: &message.entity_kind,
            entity_id: &message.entity_id,
            payload: &message.payload,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_request_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

/// Outcome of one pass over the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub dropped: usize,
    /// The pass stopped early because no credential was available.
    pub halted: bool,
}

/// Drains the outbox through an [`Enricher`].
pub struct EnrichmentWorker {
    outbox: Arc<dyn OutboxStore>,
    enricher: Arc<dyn Enricher>,
    max_attempts: u32,
}

impl EnrichmentWorker {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        enricher: Arc<dyn Enricher>,
        max_attempts: u32,
    ) -> Self {
        Self {
            outbox,
            enricher,
            max_attempts,
        }
    }

    /// Tries every queued message once.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();

        for message in self.outbox.outbox_messages(DRAIN_BATCH).await? {
            match self.enricher.enrich(&message).await {
                Ok(()) => {
                    self.outbox.remove_outbox_message(&message.id).await?;
                    tracing::debug!(
                        kind = %message.entity_kind,
                        id = %message.entity_id,
                        "enrichment delivered"
                    );
                    report.delivered += 1;
                }
                Err(GatewayError::Unauthenticated) => {
                    tracing::warn!(
                        kind = %message.entity_kind,
                        id = %message.entity_id,
                        "enrichment halted: not signed in"
                    );
                    report.halted = true;
                    break;
                }
                Err(e) if !e.is_transient() || message.attempts + 1 >= self.max_attempts => {
                    self.outbox.remove_outbox_message(&message.id).await?;
                    tracing::warn!(
                        kind = %message.entity_kind,
                        id = %message.entity_id,
                        attempts = message.attempts + 1,
                        error = %e,
                        "dropping enrichment request"
                    );
                    report.dropped += 1;
                }
                Err(e) => {
                    self.outbox
                        .record_outbox_failure(&message.id, &e.to_string())
                        .await?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Drains every `interval` until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.drain().await {
                tracing::error!(error = %e, "outbox drain failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
