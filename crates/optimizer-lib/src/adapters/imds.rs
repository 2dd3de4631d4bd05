//! Instance metadata service client

use crate::collaborators::{async_trait, CollabResult, InstanceMetadata};
use crate::error::CollaboratorError;
use crate::models::PreemptionNotice;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

const SERVICE: &str = "instance-metadata";
const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const INSTANCE_ACTION_PATH: &str = "/latest/meta-data/spot/instance-action";

pub struct InstanceMetadataClient {
    client: Client,
    base_url: Url,
}

impl InstanceMetadataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = Url::parse(base_url).context("Invalid metadata URL")?;
        Ok(Self { client, base_url })
    }

    /// Body of a metadata path, `None` on 404
    async fn fetch(&self, path: &str) -> CollabResult<Option<String>> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CollaboratorError::transport(SERVICE, e))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CollaboratorError::transport(SERVICE, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .text()
                .await
                .map(Some)
                .map_err(|e| CollaboratorError::transport(SERVICE, e)),
            status => Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl InstanceMetadata for InstanceMetadataClient {
    async fn self_id(&self) -> CollabResult<String> {
        self.fetch(INSTANCE_ID_PATH)
            .await?
            .map(|id| id.trim().to_string())
            .ok_or_else(|| CollaboratorError::unavailable(SERVICE, "instance id not published"))
    }

    async fn preemption_notice(&self) -> CollabResult<Option<PreemptionNotice>> {
        let Some(body) = self.fetch(INSTANCE_ACTION_PATH).await? else {
            return Ok(None);
        };
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| CollaboratorError::decode(SERVICE, e))
    }
}
