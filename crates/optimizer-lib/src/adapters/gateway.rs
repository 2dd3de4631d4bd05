//! HTTP client for the control-plane gateway
//!
//! One client serves market data, metrics, fleet capacity and storage
//! inventory. Every call maps transport, status and decode failures onto
//! [`CollaboratorError`] so callers can degrade instead of failing.

use crate::collaborators::{
    async_trait, CollabResult, FleetManager, MarketData, MetricQuery, MetricsService,
    StorageInventory,
};
use crate::error::CollaboratorError;
use crate::models::{CapacityState, Datapoint, PriceQuote, PriceSource, SnapshotInfo, VolumeInfo};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const SERVICE: &str = "gateway";

#[derive(Debug, Deserialize)]
struct SpotPriceEntry {
    instance_class: String,
    price_per_hour: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ReferencePriceResponse {
    price_per_hour: f64,
}

#[derive(Debug, Deserialize)]
struct StatisticsResponse {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Debug, Serialize)]
struct DesiredCapacityRequest {
    desired: u32,
}

/// Gateway API client
pub struct GatewayClient {
    client: Client,
    base_url: Url,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid gateway URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> CollabResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| CollaboratorError::transport(SERVICE, format!("invalid path {}: {}", path, e)))
    }

    async fn send(&self, request: RequestBuilder) -> CollabResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::transport(SERVICE, e))?;
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> CollabResult<T> {
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| CollaboratorError::decode(SERVICE, e))
    }

    async fn check(response: Response) -> CollabResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(CollaboratorError::Status {
            service: SERVICE,
            status,
            body,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> CollabResult<T> {
        let url = self.url(path)?;
        let response = self.send(self.client.get(url).query(query)).await?;
        Self::json(response).await
    }
}

#[async_trait]
impl MarketData for GatewayClient {
    async fn spot_prices(&self, classes: &[String], window: Duration) -> CollabResult<Vec<PriceQuote>> {
        if classes.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<SpotPriceEntry> = self
            .get(
                "/v1/prices/spot",
                &[
                    ("classes", classes.join(",")),
                    ("window_secs", window.as_secs().to_string()),
                ],
            )
            .await?;

        Ok(entries
            .into_iter()
            .map(|e| PriceQuote {
                instance_class: e.instance_class,
                price_per_hour: e.price_per_hour,
                observed_at: e.timestamp,
                source: PriceSource::Market,
                stale: false,
            })
            .collect())
    }

    async fn reference_price(&self, class: &str, region: &str) -> CollabResult<f64> {
        let response: ReferencePriceResponse = self
            .get(
                "/v1/prices/reference",
                &[("class", class.to_string()), ("region", region.to_string())],
            )
            .await?;

        if !response.price_per_hour.is_finite() || response.price_per_hour <= 0.0 {
            return Err(CollaboratorError::decode(
                SERVICE,
                format!("invalid reference price {} for {}", response.price_per_hour, class),
            ));
        }
        Ok(response.price_per_hour)
    }
}

#[async_trait]
impl MetricsService for GatewayClient {
    async fn statistics(&self, query: &MetricQuery) -> CollabResult<Vec<Datapoint>> {
        let url = self.url("/v1/metrics/statistics")?;
        let response = self.send(self.client.post(url).json(query)).await?;
        let mut body: StatisticsResponse = Self::json(response).await?;
        body.datapoints.sort_by_key(|d| d.timestamp);
        Ok(body.datapoints)
    }
}

#[async_trait]
impl FleetManager for GatewayClient {
    async fn describe(&self, fleet_id: &str) -> CollabResult<Option<CapacityState>> {
        let url = self.url(&format!("/v1/fleets/{}", fleet_id))?;
        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::json(response).await.map(Some)
    }

    async fn set_desired(&self, fleet_id: &str, desired: u32) -> CollabResult<()> {
        let url = self.url(&format!("/v1/fleets/{}/desired", fleet_id))?;
        let response = self
            .send(self.client.put(url).json(&DesiredCapacityRequest { desired }))
            .await?;
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl StorageInventory for GatewayClient {
    async fn attached_volumes(&self, instance_id: &str) -> CollabResult<Vec<VolumeInfo>> {
        self.get("/v1/volumes", &[("attached_to", instance_id.to_string())])
            .await
    }

    async fn unattached_volumes(&self) -> CollabResult<Vec<VolumeInfo>> {
        self.get("/v1/volumes", &[("status", "available".to_string())])
            .await
    }

    async fn snapshots(&self) -> CollabResult<Vec<SnapshotInfo>> {
        self.get("/v1/snapshots", &[("owner", "self".to_string())])
            .await
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> CollabResult<()> {
        let url = self.url(&format!("/v1/snapshots/{}", snapshot_id))?;
        let response = self.send(self.client.delete(url)).await?;
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> GatewayClient {
        GatewayClient::new(&server.url(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_spot_prices() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/prices/spot")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("classes".into(), "g4dn.xlarge,g5.xlarge".into()),
                Matcher::UrlEncoded("window_secs".into(), "3600".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"instance_class":"g4dn.xlarge","price_per_hour":0.42,"timestamp":"2024-05-01T10:00:00Z"}]"#,
            )
            .create_async()
            .await;

        let quotes = client(&server)
            .spot_prices(
                &["g4dn.xlarge".to_string(), "g5.xlarge".to_string()],
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price_per_hour, 0.42);
        assert_eq!(quotes[0].source, PriceSource::Market);
    }

    #[tokio::test]
    async fn test_reference_price_rejects_zero() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/prices/reference")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"price_per_hour":0.0}"#)
            .create_async()
            .await;

        let err = client(&server)
            .reference_price("g4dn.xlarge", "us-east-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_describe_missing_fleet() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/fleets/gpu-fleet")
            .with_status(404)
            .create_async()
            .await;

        let state = client(&server).describe("gpu-fleet").await.unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_set_desired_sends_absolute_value() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/v1/fleets/gpu-fleet/desired")
            .match_body(Matcher::Json(serde_json::json!({"desired": 3})))
            .with_status(204)
            .create_async()
            .await;

        client(&server).set_desired("gpu-fleet", 3).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/metrics/statistics")
            .with_status(503)
            .with_body("throttled")
            .create_async()
            .await;

        let query = MetricQuery::for_instance(
            "GPU/Monitoring",
            "GPUUtilization",
            "i-1",
            Duration::from_secs(600),
            Duration::from_secs(300),
        );
        let err = client(&server).statistics(&query).await.unwrap_err();
        match err {
            CollaboratorError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "throttled");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_statistics_sorted_oldest_first() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/metrics/statistics")
            .with_status(200)
            .with_body(
                r#"{"datapoints":[
                    {"timestamp":"2024-05-01T11:00:00Z","average":40.0},
                    {"timestamp":"2024-05-01T10:00:00Z","average":30.0}
                ]}"#,
            )
            .create_async()
            .await;

        let query = MetricQuery::for_instance(
            "GPU/Monitoring",
            "GPUUtilization",
            "i-1",
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        let points = client(&server).statistics(&query).await.unwrap();
        assert_eq!(points[0].average, 30.0);
        assert_eq!(points[1].average, 40.0);
    }
}
