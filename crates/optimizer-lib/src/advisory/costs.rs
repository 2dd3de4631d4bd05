//! Daily cost estimation and alerting

use crate::collaborators::{bounded, NotificationSink, Severity};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::pricing::PriceOracle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one cost monitoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostCheck {
    pub daily_cost: f64,
    pub threshold: f64,
    pub alert_sent: bool,
}

/// Estimates daily spend of the configured class from its spot price
pub struct CostMonitor {
    oracle: Arc<PriceOracle>,
    notifier: Arc<dyn NotificationSink>,
    instance_class: String,
    instance_id: String,
    threshold: f64,
    alerts_enabled: bool,
    timeout: Duration,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl CostMonitor {
    pub fn new(
        oracle: Arc<PriceOracle>,
        notifier: Arc<dyn NotificationSink>,
        instance_class: impl Into<String>,
        instance_id: impl Into<String>,
        threshold: f64,
        alerts_enabled: bool,
        timeout: Duration,
    ) -> Self {
        let instance_id = instance_id.into();
        Self {
            oracle,
            notifier,
            instance_class: instance_class.into(),
            logger: StructuredLogger::new(instance_id.clone()),
            instance_id,
            threshold,
            alerts_enabled,
            timeout,
            metrics: OptimizerMetrics::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Spot price of the configured class times 24; 0.0 when unknown
    pub async fn daily_cost_estimate(&self) -> f64 {
        let classes = [self.instance_class.clone()];
        let prices = self.oracle.current_spot_prices(&classes).await;
        let daily = prices
            .get(&self.instance_class)
            .map(|q| q.price_per_hour * 24.0)
            .unwrap_or(0.0);

        self.metrics.set_estimated_daily_cost(daily);
        daily
    }

    /// Estimate daily cost and alert when it exceeds the threshold
    pub async fn check(&self) -> CostCheck {
        let daily_cost = self.daily_cost_estimate().await;
        info!(daily_cost = daily_cost, "Estimated daily cost");

        let mut alert_sent = false;
        if daily_cost > self.threshold {
            self.logger.log_cost_alert(daily_cost, self.threshold);
            if self.alerts_enabled {
                alert_sent = self.send_alert(daily_cost).await;
            }
        }

        CostCheck {
            daily_cost,
            threshold: self.threshold,
            alert_sent,
        }
    }

    async fn send_alert(&self, daily_cost: f64) -> bool {
        let message = format!(
            "Daily cost estimate: ${:.2}\nThreshold: ${:.2}\nInstance: {}\nTime: {}\n\n\
             Consider scaling down unused instances, improving accelerator utilization, \
             or moving to a cheaper instance class.",
            daily_cost,
            self.threshold,
            self.instance_id,
            Utc::now().to_rfc3339()
        );

        match bounded(
            "notifications",
            self.timeout,
            self.notifier
                .publish(Severity::Warning, "Cost alert", &message),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Error sending cost alert");
                false
            }
        }
    }
}
