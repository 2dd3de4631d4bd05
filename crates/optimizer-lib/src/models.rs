//! Core data models for the cost optimizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a price quote came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// Live spot market price
    Market,
    /// Stable on-demand list price
    Reference,
}

/// Hourly price of one instance class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub instance_class: String,
    pub price_per_hour: f64,
    pub observed_at: DateTime<Utc>,
    pub source: PriceSource,
    /// Set when the quote is older than its freshness window
    #[serde(default)]
    pub stale: bool,
}

/// Utilization metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtilizationMetric {
    Accelerator,
    Memory,
    Cpu,
}

/// Which telemetry backend produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    Primary,
    Fallback,
}

/// A single utilization observation in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub metric: UtilizationMetric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source: TelemetrySource,
}

impl UtilizationSample {
    /// Create a sample, clamping the value into [0, 100]
    pub fn new(
        metric: UtilizationMetric,
        value: f64,
        timestamp: DateTime<Utc>,
        source: TelemetrySource,
    ) -> Self {
        Self {
            metric,
            value: clamp_percent(value),
            timestamp,
            source,
        }
    }
}

/// Current accelerator reading. Zero means "unknown", not "idle".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReading {
    pub accelerator: f64,
    pub memory: f64,
    pub temperature: f64,
    /// Where `accelerator` came from; `None` when neither source answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_source: Option<TelemetrySource>,
}

impl UtilizationReading {
    pub fn accelerator_known(&self) -> bool {
        self.accelerator_source.is_some()
    }
}

/// Host-level utilization included in reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemUtilization {
    pub cpu: f64,
    pub memory: f64,
}

/// Capacity of the managed fleet as reported by the fleet manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityState {
    pub current: u32,
    pub min: u32,
    pub max: u32,
    pub desired: u32,
    /// Instance ids currently in the fleet
    #[serde(default)]
    pub instances: Vec<String>,
}

/// Reclamation notice published by the instance metadata service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionNotice {
    pub action: String,
    #[serde(default, rename = "time")]
    pub termination_time: Option<DateTime<Utc>>,
}

impl PreemptionNotice {
    /// Whether the action means the instance is going away
    pub fn is_reclamation(&self) -> bool {
        matches!(
            self.action.to_ascii_lowercase().as_str(),
            "terminate" | "stop" | "hibernate"
        )
    }
}

/// Block storage volume known to the storage inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub volume_id: String,
    pub volume_type: String,
    pub size_gib: u32,
    #[serde(default)]
    pub iops: u32,
    #[serde(default)]
    pub attached_to: Option<String>,
}

/// Point-in-time storage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub size_gib: u32,
}

/// One averaged datapoint returned by the metrics service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
}

pub(crate) fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_value_clamped() {
        let now = Utc::now();
        let high = UtilizationSample::new(
            UtilizationMetric::Accelerator,
            140.0,
            now,
            TelemetrySource::Primary,
        );
        let low = UtilizationSample::new(UtilizationMetric::Cpu, -3.0, now, TelemetrySource::Fallback);

        assert_eq!(high.value, 100.0);
        assert_eq!(low.value, 0.0);
    }

    #[test]
    fn test_notice_parses_metadata_payload() {
        let notice: PreemptionNotice =
            serde_json::from_str(r#"{"action":"terminate","time":"2024-05-01T12:00:00Z"}"#).unwrap();

        assert!(notice.is_reclamation());
        assert!(notice.termination_time.is_some());

        let unknown = PreemptionNotice {
            action: "none".to_string(),
            termination_time: None,
        };
        assert!(!unknown.is_reclamation());
    }
}
