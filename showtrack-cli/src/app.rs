//! Wires the core services from the loaded configuration.

use async_trait::async_trait;
use showtrack_core::sync::{
    CredentialProvider, EnrichmentWorker, GatewayError, HttpEnricher, HttpGateway, OutboxStore,
    RemoteGateway, SqliteStore, StaticCredentials,
};
use showtrack_core::{
    AnimalRecord, AnimalService, EntityId, JournalEntry, JournalService, RemoteRecord,
    SyncEntity, SyncPolicy,
};
use std::sync::Arc;

use crate::config::Config;

/// Services sharing one database and one backend connection.
pub struct App {
    pub journal: JournalService,
    pub animals: AnimalService,
    pub store: SqliteStore,
    pub policy: SyncPolicy,
    /// `None` when no backend is configured.
    pub enrichment: Option<EnrichmentWorker>,
}

impl App {
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = SqliteStore::open(&config.database_path.value, config.backend.scope()).await?;
        let policy = config.sync.policy();
        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(StaticCredentials::new(config.backend.api_key.clone()));
        let outbox: Arc<dyn OutboxStore> = Arc::new(store.clone());

        let (journal_gateway, animal_gateway, enrichment) = match &config.backend.url {
            Some(url) => {
                let timeout = config.sync.data_timeout();
                let journal: Arc<dyn RemoteGateway<JournalEntry>> = Arc::new(
                    HttpGateway::<JournalEntry>::new(url.as_str(), credentials.clone(), timeout)?,
                );
                let animals: Arc<dyn RemoteGateway<AnimalRecord>> = Arc::new(
                    HttpGateway::<AnimalRecord>::new(url.as_str(), credentials.clone(), timeout)?,
                );
                let enrichment = match config.backend.enrichment_url() {
                    Some(webhook) => {
                        let enricher =
                            HttpEnricher::new(webhook, credentials, config.sync.ai_timeout())?;
                        Some(EnrichmentWorker::new(
                            outbox.clone(),
                            Arc::new(enricher),
                            policy.max_attempts,
                        ))
                    }
                    None => None,
                };
                (journal, animals, enrichment)
            }
            None => {
                let journal: Arc<dyn RemoteGateway<JournalEntry>> = Arc::new(Disconnected);
                let animals: Arc<dyn RemoteGateway<AnimalRecord>> = Arc::new(Disconnected);
                (journal, animals, None)
            }
        };

        let journal = JournalService::with_outbox(
            Arc::new(store.clone()),
            journal_gateway,
            outbox.clone(),
            policy.clone(),
        );
        let animals = AnimalService::with_outbox(
            Arc::new(store.clone()),
            animal_gateway,
            outbox,
            policy.clone(),
        );

        Ok(Self {
            journal,
            animals,
            store,
            policy,
            enrichment,
        })
    }
}

/// Gateway used when no backend URL is configured: every call is a
/// transient failure, so writes stay queued until one is.
struct Disconnected;

impl Disconnected {
    fn error() -> GatewayError {
        GatewayError::NetworkUnavailable("no backend configured".to_string())
    }
}

#[async_trait]
impl<E: SyncEntity> RemoteGateway<E> for Disconnected {
    async fn create(&self, _payload: &E) -> Result<RemoteRecord<E>, GatewayError> {
        Err(Self::error())
    }

    async fn update(&self, _id: &EntityId, _payload: &E) -> Result<RemoteRecord<E>, GatewayError> {
        Err(Self::error())
    }

    async fn delete(&self, _id: &EntityId) -> Result<(), GatewayError> {
        Err(Self::error())
    }

    async fn get(&self, _id: &EntityId) -> Result<RemoteRecord<E>, GatewayError> {
        Err(Self::error())
    }

    async fn list(&self, _filter: &E::Filter) -> Result<Vec<RemoteRecord<E>>, GatewayError> {
        Err(Self::error())
    }
}
