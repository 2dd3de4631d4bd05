//! Utilization acquisition from the metrics service with snapshot fallback

use super::snapshot::TelemetrySnapshot;
use crate::collaborators::{bounded, MetricQuery, MetricsService};
use crate::models::{
    clamp_percent, Datapoint, SystemUtilization, TelemetrySource, UtilizationMetric,
    UtilizationReading, UtilizationSample,
};
use crate::observability::OptimizerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ACCELERATOR_NAMESPACE: &str = "GPU/Monitoring";
pub const ACCELERATOR_METRIC: &str = "GPUUtilization";

/// Window and period for the current reading
pub const CURRENT_WINDOW: Duration = Duration::from_secs(10 * 60);
pub const CURRENT_PERIOD: Duration = Duration::from_secs(300);

/// Window and period for profile history
pub const HISTORY_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const HISTORY_PERIOD: Duration = Duration::from_secs(3600);

/// Resolves current and historical utilization.
///
/// Never fails: unknown values come back as zero.
pub struct UtilizationMonitor {
    metrics_service: Arc<dyn MetricsService>,
    snapshot: TelemetrySnapshot,
    instance_id: String,
    timeout: Duration,
    metrics: OptimizerMetrics,
}

impl UtilizationMonitor {
    pub fn new(
        metrics_service: Arc<dyn MetricsService>,
        snapshot: TelemetrySnapshot,
        instance_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            metrics_service,
            snapshot,
            instance_id: instance_id.into(),
            timeout,
            metrics: OptimizerMetrics::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current accelerator reading of this instance
    pub async fn current_utilization(&self) -> UtilizationReading {
        let mut reading = UtilizationReading::default();

        let query = MetricQuery::for_instance(
            ACCELERATOR_NAMESPACE,
            ACCELERATOR_METRIC,
            &self.instance_id,
            CURRENT_WINDOW,
            CURRENT_PERIOD,
        );
        match self.query(&query).await {
            Some(points) => {
                if let Some(latest) = latest(&points) {
                    reading.accelerator = clamp_percent(latest.average);
                    reading.accelerator_source = Some(TelemetrySource::Primary);
                }
            }
            None => debug!("Primary accelerator metrics unavailable"),
        }

        // Primary only supplies accelerator utilization today; the snapshot
        // fills whatever it left at zero.
        if reading.accelerator == 0.0 || reading.memory == 0.0 || reading.temperature == 0.0 {
            match self.snapshot.read().await {
                Ok(Some(section)) => {
                    let mut filled = false;
                    if reading.accelerator == 0.0 && section.utilization > 0.0 {
                        reading.accelerator = clamp_percent(section.utilization);
                        reading.accelerator_source = Some(TelemetrySource::Fallback);
                        filled = true;
                    }
                    if reading.memory == 0.0 && section.memory_utilization > 0.0 {
                        reading.memory = clamp_percent(section.memory_utilization);
                        filled = true;
                    }
                    if reading.temperature == 0.0 && section.temperature_c > 0.0 {
                        reading.temperature = section.temperature_c;
                        filled = true;
                    }
                    if filled {
                        self.metrics.inc_telemetry_fallback();
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Shared accelerator metrics unavailable"),
            }
        }

        reading
    }

    /// Hourly accelerator samples over a trailing window, oldest first
    pub async fn historical_utilization(
        &self,
        instance_id: &str,
        window: Duration,
    ) -> Vec<UtilizationSample> {
        let query = MetricQuery::for_instance(
            ACCELERATOR_NAMESPACE,
            ACCELERATOR_METRIC,
            instance_id,
            window,
            HISTORY_PERIOD,
        );

        let mut points = self.query(&query).await.unwrap_or_default();
        points.sort_by_key(|p| p.timestamp);
        points
            .into_iter()
            .filter(|p| p.average.is_finite())
            .map(|p| {
                UtilizationSample::new(
                    UtilizationMetric::Accelerator,
                    p.average,
                    p.timestamp,
                    TelemetrySource::Primary,
                )
            })
            .collect()
    }

    /// Mean accelerator utilization of an instance; `None` without datapoints
    pub async fn mean_utilization(&self, instance_id: &str, window: Duration) -> Option<f64> {
        let query = MetricQuery::for_instance(
            ACCELERATOR_NAMESPACE,
            ACCELERATOR_METRIC,
            instance_id,
            window,
            CURRENT_PERIOD,
        );
        let points = self.query(&query).await?;
        let values: Vec<f64> = points
            .iter()
            .map(|p| p.average)
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Host CPU and memory utilization of this instance
    pub async fn system_utilization(&self) -> SystemUtilization {
        let cpu = MetricQuery::for_instance(
            "AWS/EC2",
            "CPUUtilization",
            &self.instance_id,
            CURRENT_WINDOW,
            CURRENT_PERIOD,
        );
        let memory = MetricQuery::for_instance(
            "System/Linux",
            "MemoryUtilization",
            &self.instance_id,
            CURRENT_WINDOW,
            CURRENT_PERIOD,
        );

        let (cpu, memory) = tokio::join!(self.query(&cpu), self.query(&memory));
        let latest_value = |points: Option<Vec<Datapoint>>| {
            points
                .as_deref()
                .and_then(latest)
                .map(|p| clamp_percent(p.average))
        };

        SystemUtilization {
            cpu: latest_value(cpu).unwrap_or(0.0),
            memory: latest_value(memory).unwrap_or(0.0),
        }
    }

    /// Returns `None` on failure or an empty result
    async fn query(&self, query: &MetricQuery) -> Option<Vec<Datapoint>> {
        match bounded(
            "metrics",
            self.timeout,
            self.metrics_service.statistics(query),
        )
        .await
        {
            Ok(points) if points.is_empty() => None,
            Ok(points) => Some(points),
            Err(e) => {
                warn!(
                    namespace = %query.namespace,
                    metric = %query.metric,
                    error = %e,
                    "Metrics query failed"
                );
                None
            }
        }
    }
}

fn latest(points: &[Datapoint]) -> Option<&Datapoint> {
    points.iter().max_by_key(|p| p.timestamp)
}
