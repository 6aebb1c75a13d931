/**
 * TRANSPORT - Client HTTP du serveur de simulation
 *
 * RÔLE : Appels requête/réponse vers /subscribe, /update, /unsubscribe et
 * /changeSimulator. Aucune décision métier ici : les réponses `successful: false`
 * sont rendues telles quelles, seules les erreurs réseau/HTTP/décodage
 * deviennent des TransportError.
 *
 * /changeSimulator est un POST application/x-www-form-urlencoded, les autres
 * routes sont des GET avec `clientId` en query.
 *
 * Chaque requête a un timeout : une requête bloquée devient une erreur au lieu
 * de figer la boucle de polling.
 */

use crate::models::{AckResponse, ChangeSimulatorRequest, SubscribeResponse, UpdateResponse};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const SUBSCRIBE: &str = "subscribe";
pub const UPDATE: &str = "update";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const CHANGE_SIMULATOR: &str = "changeSimulator";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to /{endpoint} failed: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to /{endpoint} timed out")]
    Timeout { endpoint: &'static str },
    #[error("/{endpoint} answered HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("invalid response from /{endpoint}: {reason}")]
    Decode { endpoint: &'static str, reason: String },
}

/// Calls to the simulation server.
pub trait Transport: Send + Sync + 'static {
    fn subscribe(&self) -> impl Future<Output = Result<SubscribeResponse, TransportError>> + Send;

    fn update(&self, client_id: &str) -> impl Future<Output = Result<UpdateResponse, TransportError>> + Send;

    fn unsubscribe(&self, client_id: &str) -> impl Future<Output = Result<AckResponse, TransportError>> + Send;

    fn change_simulator(
        &self,
        client_id: &str,
        simulator: &str,
    ) -> impl Future<Output = Result<SubscribeResponse, TransportError>> + Send;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("clusterviz/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| TransportError::Http { endpoint: "", source })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get<R: DeserializeOwned>(&self, endpoint: &'static str, client_id: Option<&str>) -> Result<R, TransportError> {
        let mut request = self.client.get(self.url(endpoint));
        if let Some(id) = client_id {
            request = request.query(&[("clientId", id)]);
        }
        debug!("[transport] GET /{}", endpoint);
        let response = request.send().await.map_err(|e| classify(endpoint, e))?;
        decode(endpoint, response).await
    }
}

impl Transport for HttpTransport {
    async fn subscribe(&self) -> Result<SubscribeResponse, TransportError> {
        self.get(SUBSCRIBE, None).await
    }

    async fn update(&self, client_id: &str) -> Result<UpdateResponse, TransportError> {
        self.get(UPDATE, Some(client_id)).await
    }

    async fn unsubscribe(&self, client_id: &str) -> Result<AckResponse, TransportError> {
        self.get(UNSUBSCRIBE, Some(client_id)).await
    }

    async fn change_simulator(&self, client_id: &str, simulator: &str) -> Result<SubscribeResponse, TransportError> {
        let body = ChangeSimulatorRequest {
            client_id: client_id.to_string(),
            simulator: simulator.to_string(),
        };
        debug!("[transport] POST /{} ({})", CHANGE_SIMULATOR, simulator);
        // le serveur lit clientId/simulator comme des champs de formulaire
        let response = self
            .client
            .post(self.url(CHANGE_SIMULATOR))
            .form(&body)
            .send()
            .await
            .map_err(|e| classify(CHANGE_SIMULATOR, e))?;
        decode(CHANGE_SIMULATOR, response).await
    }
}

fn classify(endpoint: &'static str, source: reqwest::Error) -> TransportError {
    if source.is_timeout() {
        TransportError::Timeout { endpoint }
    } else {
        TransportError::Http { endpoint, source }
    }
}

async fn decode<R: DeserializeOwned>(endpoint: &'static str, response: reqwest::Response) -> Result<R, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status { endpoint, status: status.as_u16() });
    }
    let body = response.bytes().await.map_err(|e| classify(endpoint, e))?;
    serde_json::from_slice(&body).map_err(|e| TransportError::Decode {
        endpoint,
        reason: e.to_string(),
    })
}
