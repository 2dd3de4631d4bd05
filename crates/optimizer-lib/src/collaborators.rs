//! Interfaces to the external systems the optimizer depends on
//!
//! The core only talks to these traits. Concrete implementations live in
//! [`crate::adapters`]; tests substitute in-memory fakes.

use crate::error::CollaboratorError;
use crate::models::{
    CapacityState, Datapoint, PreemptionNotice, PriceQuote, SnapshotInfo, VolumeInfo,
};
use crate::orchestrator::CostReport;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub use async_trait::async_trait;

pub type CollabResult<T> = Result<T, CollaboratorError>;

/// Spot and reference price source
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Spot price history for the given classes over a trailing window
    async fn spot_prices(&self, classes: &[String], window: Duration)
        -> CollabResult<Vec<PriceQuote>>;

    /// On-demand list price for one class in one region
    async fn reference_price(&self, class: &str, region: &str) -> CollabResult<f64>;
}

/// Query against the metrics service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric: String,
    pub dimensions: Vec<(String, String)>,
    pub window_secs: u64,
    pub period_secs: u64,
}

impl MetricQuery {
    /// Query for a metric of a single instance
    pub fn for_instance(
        namespace: &str,
        metric: &str,
        instance_id: &str,
        window: Duration,
        period: Duration,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            metric: metric.to_string(),
            dimensions: vec![("InstanceId".to_string(), instance_id.to_string())],
            window_secs: window.as_secs(),
            period_secs: period.as_secs(),
        }
    }
}

/// Time-series metrics backend
#[async_trait]
pub trait MetricsService: Send + Sync {
    /// Averaged datapoints, oldest first
    async fn statistics(&self, query: &MetricQuery) -> CollabResult<Vec<Datapoint>>;
}

/// External fleet manager owning the desired-capacity setpoint
#[async_trait]
pub trait FleetManager: Send + Sync {
    /// `Ok(None)` when the fleet does not exist
    async fn describe(&self, fleet_id: &str) -> CollabResult<Option<CapacityState>>;

    /// Last-writer-wins setpoint, never an increment
    async fn set_desired(&self, fleet_id: &str, desired: u32) -> CollabResult<()>;
}

/// Instance metadata service of the host the optimizer runs on
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn self_id(&self) -> CollabResult<String>;

    /// `Ok(None)` is the common case and must stay cheap
    async fn preemption_notice(&self) -> CollabResult<Option<PreemptionNotice>>;
}

/// Alert severity attached to published messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Fire-and-forget alert channel
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, severity: Severity, subject: &str, message: &str) -> CollabResult<()>;
}

/// Best-effort hooks into the workloads running on this instance
#[async_trait]
pub trait WorkloadControl: Send + Sync {
    /// Stop accepting new work
    async fn quiesce(&self, timeout: Duration) -> CollabResult<()>;

    /// Flush in-flight state to durable storage
    async fn flush(&self, timeout: Duration) -> CollabResult<()>;

    /// Back up critical state
    async fn backup(&self, timeout: Duration) -> CollabResult<()>;

    /// Stop services that are not needed to serve traffic; returns how many stopped
    async fn stop_non_essential(&self, timeout: Duration) -> CollabResult<usize>;
}

/// Block storage inventory used by the storage and cleanup advisors
#[async_trait]
pub trait StorageInventory: Send + Sync {
    async fn attached_volumes(&self, instance_id: &str) -> CollabResult<Vec<VolumeInfo>>;

    async fn unattached_volumes(&self) -> CollabResult<Vec<VolumeInfo>>;

    async fn snapshots(&self) -> CollabResult<Vec<SnapshotInfo>>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> CollabResult<()>;
}

/// Persists finished cost reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Returns a human-readable location of the stored report
    async fn persist(&self, report: &CostReport) -> CollabResult<String>;
}

/// Run a collaborator call under a time budget.
///
/// A timeout only stops waiting; the remote side effect is not cancelled.
pub async fn bounded<T, F>(service: &'static str, timeout: Duration, call: F) -> CollabResult<T>
where
    F: Future<Output = CollabResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout { service, timeout }),
    }
}
