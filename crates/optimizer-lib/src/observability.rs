//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (cycle latency, step failures, scaling actions, guardrail tier)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle and drain durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    cycle_duration_seconds: Histogram,
    drain_duration_seconds: Histogram,
    cycles_total: IntCounterVec,
    step_failures: IntCounterVec,
    scaling_actions: IntCounterVec,
    guardrail_tier: IntGauge,
    preemption_notices: IntCounter,
    price_fallbacks: IntCounterVec,
    telemetry_fallbacks: IntCounter,
    estimated_daily_cost: Gauge,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "cost_optimizer_cycle_duration_seconds",
                "Time spent running a full optimization cycle",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            drain_duration_seconds: register_histogram!(
                "cost_optimizer_drain_duration_seconds",
                "Time spent draining after a reclamation notice",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register drain_duration_seconds"),

            cycles_total: register_int_counter_vec!(
                "cost_optimizer_cycles_total",
                "Optimization cycles by outcome",
                &["status"]
            )
            .expect("Failed to register cycles_total"),

            step_failures: register_int_counter_vec!(
                "cost_optimizer_step_failures_total",
                "Failed optimization steps by step name",
                &["step"]
            )
            .expect("Failed to register step_failures"),

            scaling_actions: register_int_counter_vec!(
                "cost_optimizer_scaling_actions_total",
                "Desired-capacity changes by action",
                &["action"]
            )
            .expect("Failed to register scaling_actions"),

            guardrail_tier: register_int_gauge!(
                "cost_optimizer_guardrail_tier",
                "Latest budget guardrail tier (0 normal, 1 preventive, 2 emergency)"
            )
            .expect("Failed to register guardrail_tier"),

            preemption_notices: register_int_counter!(
                "cost_optimizer_preemption_notices_total",
                "Reclamation notices detected"
            )
            .expect("Failed to register preemption_notices"),

            price_fallbacks: register_int_counter_vec!(
                "cost_optimizer_price_fallbacks_total",
                "Reference price lookups served from a fallback",
                &["origin"]
            )
            .expect("Failed to register price_fallbacks"),

            telemetry_fallbacks: register_int_counter!(
                "cost_optimizer_telemetry_fallbacks_total",
                "Utilization readings completed from the local snapshot"
            )
            .expect("Failed to register telemetry_fallbacks"),

            estimated_daily_cost: register_gauge!(
                "cost_optimizer_estimated_daily_cost_usd",
                "Latest estimated daily fleet cost"
            )
            .expect("Failed to register estimated_daily_cost"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptimizerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OptimizerMetrics")
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_cycle(&self, duration_secs: f64, status: &str) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
        self.inner().cycles_total.with_label_values(&[status]).inc();
    }

    pub fn observe_drain(&self, duration_secs: f64) {
        self.inner().drain_duration_seconds.observe(duration_secs);
    }

    pub fn inc_step_failure(&self, step: &str) {
        self.inner().step_failures.with_label_values(&[step]).inc();
    }

    pub fn inc_scaling_action(&self, action: &str) {
        self.inner().scaling_actions.with_label_values(&[action]).inc();
    }

    pub fn set_guardrail_tier(&self, tier: i64) {
        self.inner().guardrail_tier.set(tier);
    }

    pub fn inc_preemption_notices(&self) {
        self.inner().preemption_notices.inc();
    }

    pub fn inc_price_fallback(&self, origin: &str) {
        self.inner().price_fallbacks.with_label_values(&[origin]).inc();
    }

    pub fn inc_telemetry_fallback(&self) {
        self.inner().telemetry_fallbacks.inc();
    }

    pub fn set_estimated_daily_cost(&self, usd: f64) {
        self.inner().estimated_daily_cost.set(usd);
    }
}

/// Structured logger for optimizer events
///
/// Every event carries a stable `event` field so log pipelines can key on it.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance_id: String,
}

impl StructuredLogger {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str, command: &str) {
        info!(
            event = "optimizer_started",
            instance_id = %self.instance_id,
            version = %version,
            command = %command,
            "Cost optimizer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "optimizer_shutdown",
            instance_id = %self.instance_id,
            reason = %reason,
            "Cost optimizer shutting down"
        );
    }

    pub fn log_scaling(&self, fleet_id: &str, from: u32, to: u32, action: &str, reasoning: &str) {
        info!(
            event = "scaling_applied",
            instance_id = %self.instance_id,
            fleet_id = %fleet_id,
            from = from,
            to = to,
            action = %action,
            reasoning = %reasoning,
            "Desired capacity updated"
        );
    }

    pub fn log_guardrail(&self, tier: &str, utilization_pct: f64, projected_overage: f64) {
        match tier {
            "emergency" => error!(
                event = "guardrail_tier",
                instance_id = %self.instance_id,
                tier = %tier,
                utilization_pct = utilization_pct,
                projected_overage = projected_overage,
                "Budget emergency, enforcing cost controls"
            ),
            "preventive" => warn!(
                event = "guardrail_tier",
                instance_id = %self.instance_id,
                tier = %tier,
                utilization_pct = utilization_pct,
                projected_overage = projected_overage,
                "Budget at risk, applying preventive measures"
            ),
            _ => info!(
                event = "guardrail_tier",
                instance_id = %self.instance_id,
                tier = %tier,
                utilization_pct = utilization_pct,
                projected_overage = projected_overage,
                "Budget within limits"
            ),
        }
    }

    pub fn log_cost_alert(&self, daily_cost: f64, threshold: f64) {
        warn!(
            event = "cost_alert",
            instance_id = %self.instance_id,
            daily_cost = daily_cost,
            threshold = threshold,
            "Daily cost estimate exceeds threshold"
        );
    }

    pub fn log_preemption(&self, action: &str, seconds_remaining: f64) {
        error!(
            event = "preemption_notice",
            instance_id = %self.instance_id,
            action = %action,
            seconds_remaining = seconds_remaining,
            "Reclamation notice received, draining instance"
        );
    }

    pub fn log_cycle(&self, status: &str, succeeded: usize, total: usize, duration_secs: f64) {
        if succeeded == total {
            info!(
                event = "cycle_completed",
                instance_id = %self.instance_id,
                status = %status,
                succeeded = succeeded,
                total = total,
                duration_secs = duration_secs,
                "Cost optimization cycle completed successfully"
            );
        } else {
            warn!(
                event = "cycle_completed",
                instance_id = %self.instance_id,
                status = %status,
                succeeded = succeeded,
                total = total,
                duration_secs = duration_secs,
                "Cost optimization cycle completed with issues"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_metrics_creation() {
        let metrics = OptimizerMetrics::new();

        metrics.observe_cycle(1.5, "completed");
        metrics.observe_drain(3.0);
        metrics.inc_step_failure("resource_cleanup");
        metrics.inc_scaling_action("scale_up_reactive");
        metrics.set_guardrail_tier(1);
        metrics.inc_preemption_notices();
        metrics.inc_price_fallback("cache");
        metrics.inc_telemetry_fallback();
        metrics.set_estimated_daily_cost(12.5);

        // A second handle shares the same registration
        let again = OptimizerMetrics::new();
        again.set_guardrail_tier(0);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("i-abc");
        assert_eq!(logger.instance_id, "i-abc");
    }
}
