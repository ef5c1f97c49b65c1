//! Remote gateway: the backend's REST endpoints behind a uniform result shape.
//!
//! The gateway never retries. Every failure is classified into a
//! [`GatewayError`] and handed back to the coordinator, which decides whether
//! to queue or surface it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::credentials::CredentialProvider;
use super::error::GatewayError;
use crate::entity::SyncEntity;
use crate::models::{EntityId, RemoteRecord};

/// Backend operations for one entity type.
#[async_trait]
pub trait RemoteGateway<E: SyncEntity>: Send + Sync {
    async fn create(&self, payload: &E) -> Result<RemoteRecord<E>, GatewayError>;

    async fn update(&self, id: &EntityId, payload: &E) -> Result<RemoteRecord<E>, GatewayError>;

    /// Deleting an id the server no longer knows is a success.
    async fn delete(&self, id: &EntityId) -> Result<(), GatewayError>;

    async fn get(&self, id: &EntityId) -> Result<RemoteRecord<E>, GatewayError>;

    async fn list(&self, filter: &E::Filter) -> Result<Vec<RemoteRecord<E>>, GatewayError>;
}

/// JSON-over-HTTP gateway for the `/{kind}` collection of `E`.
pub struct HttpGateway<E> {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    timeout: Duration,
    _entity: PhantomData<fn() -> E>,
}

impl<E: SyncEntity> HttpGateway<E> {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NetworkUnavailable(e.to_string()))?;
        Ok(Self::with_client(client, base_url, credentials, timeout))
    }

    /// Shares an existing client (and its connection pool).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            credentials,
            timeout,
            _entity: PhantomData,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, E::KIND)
    }

    fn item_url(&self, id: &EntityId) -> String {
        format!("{}/{}/{}", self.base_url, E::KIND, id)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GatewayError> {
        // Checked before building the connection so a signed-out caller
        // never reaches the network.
        let token = self.credentials.bearer_token()?;

        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| classify_request_error(e, self.timeout))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_request_error(e, self.timeout))?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl<E: SyncEntity> RemoteGateway<E> for HttpGateway<E> {
    async fn create(&self, payload: &E) -> Result<RemoteRecord<E>, GatewayError> {
        let response = self
            .send(self.client.post(self.collection_url()).json(payload))
            .await?;
        self.decode(response).await
    }

    async fn update(&self, id: &EntityId, payload: &E) -> Result<RemoteRecord<E>, GatewayError> {
        let response = self
            .send(self.client.patch(self.item_url(id)).json(payload))
            .await?;
        self.decode(response).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), GatewayError> {
        match self.send(self.client.delete(self.item_url(id))).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(kind = E::KIND, %id, "delete target already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get(&self, id: &EntityId) -> Result<RemoteRecord<E>, GatewayError> {
        let response = self.send(self.client.get(self.item_url(id))).await?;
        self.decode(response).await
    }

    async fn list(&self, filter: &E::Filter) -> Result<Vec<RemoteRecord<E>>, GatewayError> {
        let response = self
            .send(self.client.get(self.collection_url()).query(filter))
            .await?;
        self.decode(response).await
    }
}

/// Maps a transport-level reqwest failure.
pub(crate) fn classify_request_error(e: reqwest::Error, timeout: Duration) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(timeout)
    } else if e.is_decode() {
        GatewayError::InvalidResponse(e.to_string())
    } else {
        GatewayError::NetworkUnavailable(e.to_string())
    }
}

/// Maps a non-2xx response, preferring the JSON `message` field of the body.
pub(crate) async fn error_from_response(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        return GatewayError::Unauthenticated;
    }

    let text = response.text().await.unwrap_or_default();
    GatewayError::Server {
        status,
        message: server_message(&text),
    }
}

fn server_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
