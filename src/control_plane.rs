//! Control-plane registration client
//!
//! Announces this data plane to the control plane on startup and withdraws
//! it on shutdown.
//!
//! ```text
//! POST   {url}/v4alpha/dataplanes                  register
//! PUT    {url}/v4alpha/dataplanes/{id}/unregister  unregister
//! DELETE {url}/v4alpha/dataplanes/{id}             delete
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ControlPlaneConfig;
use crate::signaling::{Envelope, IdResponse, WireMessage};

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control plane returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Registration payload describing this data plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneInstance {
    #[serde(rename = "@id")]
    pub id: String,
    /// Where the control plane sends signaling requests
    pub url: String,
    pub allowed_source_types: Vec<String>,
    pub allowed_transfer_types: Vec<String>,
}

impl WireMessage for DataPlaneInstance {
    const TYPE: &'static str = "DataPlaneInstance";
}

impl DataPlaneInstance {
    pub fn from_config(config: &ControlPlaneConfig, allowed_transfer_types: &[String]) -> Self {
        Self {
            id: config.data_plane_id.clone(),
            url: config.public_url.clone(),
            allowed_source_types: config.allowed_source_types.clone(),
            allowed_transfer_types: allowed_transfer_types.to_vec(),
        }
    }
}

pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ControlPlaneError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn dataplanes_url(&self) -> String {
        format!("{}/v4alpha/dataplanes", self.base_url)
    }

    pub async fn register(
        &self,
        instance: &DataPlaneInstance,
    ) -> Result<IdResponse, ControlPlaneError> {
        info!(data_plane_id = %instance.id, url = %instance.url, "Registering with control plane");

        let response = self
            .client
            .post(self.dataplanes_url())
            .json(&Envelope::new(instance.clone()))
            .send()
            .await?;
        let response = check_status(response).await?;

        let envelope: Envelope<IdResponse> = response.json().await?;
        let id = envelope
            .into_message()
            .map_err(|f| ControlPlaneError::InvalidResponse(f.reason))?;
        debug!(id = %id.id, created_at = id.created_at, "Registered");
        Ok(id)
    }

    /// Mark the instance unavailable; the record is kept
    pub async fn unregister(&self, id: &str) -> Result<(), ControlPlaneError> {
        info!(data_plane_id = %id, "Unregistering from control plane");
        let response = self
            .client
            .put(format!("{}/{}/unregister", self.dataplanes_url(), id))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ControlPlaneError> {
        info!(data_plane_id = %id, "Deleting registration from control plane");
        let response = self
            .client
            .delete(format!("{}/{}", self.dataplanes_url(), id))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ControlPlaneError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ControlPlaneError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode,
        routing::{delete, post, put},
    };
    use serde_json::{Value, json};

    use super::*;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn instance() -> DataPlaneInstance {
        DataPlaneInstance {
            id: "dp-1".into(),
            url: "http://localhost:8080".into(),
            allowed_source_types: vec!["HttpData".into()],
            allowed_transfer_types: vec!["HttpData-PUSH".into()],
        }
    }

    #[tokio::test]
    async fn test_register_round_trip() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let seen_route = seen.clone();
        let router = Router::new().route(
            "/v4alpha/dataplanes",
            post(move |Json(body): Json<Value>| {
                let seen = seen_route.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    Json(json!({
                        "@context": {"@vocab": "https://w3id.org/edc/v0.0.1/ns/"},
                        "@type": "IdResponse",
                        "@id": "dp-1",
                        "createdAt": 1_700_000_000_000_i64
                    }))
                }
            }),
        );
        let client = ControlPlaneClient::new(spawn(router).await).unwrap();

        let id = client.register(&instance()).await.unwrap();
        assert_eq!(id.id, "dp-1");
        assert_eq!(id.created_at, 1_700_000_000_000);

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["@type"], "DataPlaneInstance");
        assert_eq!(body["@id"], "dp-1");
        assert_eq!(body["allowedTransferTypes"][0], "HttpData-PUSH");
    }

    #[tokio::test]
    async fn test_unregister_and_delete() {
        let router = Router::new()
            .route(
                "/v4alpha/dataplanes/{id}/unregister",
                put(|Path(id): Path<String>| async move {
                    if id == "dp-1" { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND }
                }),
            )
            .route(
                "/v4alpha/dataplanes/{id}",
                delete(|| async { StatusCode::NO_CONTENT }),
            );
        let client = ControlPlaneClient::new(format!("{}/", spawn(router).await)).unwrap();

        client.unregister("dp-1").await.unwrap();
        client.delete("dp-1").await.unwrap();

        match client.unregister("other").await {
            Err(ControlPlaneError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other),
        }
    }
}
