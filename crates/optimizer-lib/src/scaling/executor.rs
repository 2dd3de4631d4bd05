//! Applies scaling decisions to the external fleet manager

use super::decision::{decide, reactive_decision, ScalingAction, ScalingDecision, ScalingPolicy};
use super::history::{ScalingHistoryLog, ScalingRecord};
use crate::collaborators::{bounded, FleetManager};
use crate::models::CapacityState;
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::predictor::UsagePatternPredictor;
use crate::telemetry::UtilizationMonitor;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const UNKNOWN_UTILIZATION: &str = "Utilization unknown";

/// What a scaling pass saw and did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingOutcome {
    pub action: ScalingAction,
    pub from: Option<u32>,
    pub to: Option<u32>,
    pub applied: bool,
    pub current_utilization: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_utilization: Option<f64>,
    pub reasoning: String,
}

impl ScalingOutcome {
    fn skipped(current_utilization: f64, predicted: Option<f64>, reasoning: &str) -> Self {
        Self {
            action: ScalingAction::NoChange,
            from: None,
            to: None,
            applied: false,
            current_utilization,
            predicted_utilization: predicted,
            reasoning: reasoning.to_string(),
        }
    }
}

/// Executes basic and pattern-based scaling against one fleet.
///
/// Desired capacity is written as an absolute setpoint, so overlapping
/// passes need no coordination beyond last-writer-wins.
pub struct FleetScaler {
    fleet: Arc<dyn FleetManager>,
    fleet_id: Option<String>,
    monitor: Arc<UtilizationMonitor>,
    predictor: Arc<UsagePatternPredictor>,
    history: Arc<ScalingHistoryLog>,
    timeout: Duration,
    idle_window: Duration,
    profile_max_age: Duration,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl FleetScaler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fleet: Arc<dyn FleetManager>,
        fleet_id: Option<String>,
        monitor: Arc<UtilizationMonitor>,
        predictor: Arc<UsagePatternPredictor>,
        history: Arc<ScalingHistoryLog>,
        timeout: Duration,
        idle_window: Duration,
        profile_max_age: Duration,
    ) -> Self {
        let logger = StructuredLogger::new(monitor.instance_id());
        Self {
            fleet,
            fleet_id,
            monitor,
            predictor,
            history,
            timeout,
            idle_window,
            profile_max_age,
            metrics: OptimizerMetrics::new(),
            logger,
        }
    }

    pub fn fleet_id(&self) -> Option<&str> {
        self.fleet_id.as_deref()
    }

    /// Current fleet capacity; `None` when no fleet is configured, found or reachable
    pub async fn describe(&self) -> Option<CapacityState> {
        let fleet_id = self.fleet_id.as_deref()?;
        match bounded("fleet", self.timeout, self.fleet.describe(fleet_id)).await {
            Ok(Some(state)) => Some(state),
            Ok(None) => {
                warn!(fleet_id = %fleet_id, "Fleet not found");
                None
            }
            Err(e) => {
                warn!(fleet_id = %fleet_id, error = %e, "Could not describe fleet");
                None
            }
        }
    }

    /// Coarse reactive check driven by the configured thresholds
    pub async fn auto_scale(&self, policy: &ScalingPolicy) -> Result<ScalingOutcome> {
        let reading = self.monitor.current_utilization().await;
        let utilization = reading.accelerator;

        if !reading.accelerator_known() {
            warn!("Accelerator utilization unknown, skipping auto-scaling");
            return Ok(ScalingOutcome::skipped(utilization, None, UNKNOWN_UTILIZATION));
        }
        if self.fleet_id.is_none() {
            warn!("No fleet configured, skipping auto-scaling");
            return Ok(ScalingOutcome::skipped(utilization, None, "No fleet configured"));
        }
        let Some(state) = self.describe().await else {
            return Ok(ScalingOutcome::skipped(utilization, None, "Fleet unavailable"));
        };

        info!(
            capacity = state.current,
            utilization = utilization,
            "Checking auto-scaling requirements"
        );

        let idle = if utilization < policy.scale_down_threshold && state.current > state.min {
            self.idle_instances(&state, policy.scale_down_threshold)
                .await
                .len()
        } else {
            0
        };

        let decision =
            reactive_decision(policy, state.current, state.min, state.max, utilization, idle);
        self.apply(&state, decision, utilization, None).await
    }

    /// Prediction-aware pass combining the usage profile with current utilization
    pub async fn pattern_scale(&self) -> Result<ScalingOutcome> {
        let now = Utc::now();
        let profile = self.predictor.current_profile(self.profile_max_age).await;
        let predicted = UsagePatternPredictor::predict_at(&profile, now);
        let reading = self.monitor.current_utilization().await;
        let utilization = reading.accelerator;

        if !reading.accelerator_known() {
            warn!("Accelerator utilization unknown, skipping pattern scaling");
            return Ok(ScalingOutcome::skipped(
                utilization,
                Some(predicted),
                UNKNOWN_UTILIZATION,
            ));
        }
        if self.fleet_id.is_none() {
            return Ok(ScalingOutcome::skipped(
                utilization,
                Some(predicted),
                "No fleet configured",
            ));
        }
        let Some(state) = self.describe().await else {
            return Ok(ScalingOutcome::skipped(
                utilization,
                Some(predicted),
                "Fleet not found",
            ));
        };

        let decision = decide(state.current, state.min, state.max, utilization, predicted);
        self.apply(&state, decision, utilization, Some(predicted))
            .await
    }

    /// Force desired capacity to the fleet minimum. Returns the new setpoint.
    pub async fn scale_to_minimum(&self) -> Result<Option<u32>> {
        let Some(fleet_id) = self.fleet_id.as_deref() else {
            return Ok(None);
        };
        let Some(state) = self.describe().await else {
            return Ok(None);
        };

        self.set_desired(fleet_id, state.min).await?;
        info!(fleet_id = %fleet_id, capacity = state.min, "Emergency scale down to minimum");
        Ok(Some(state.min))
    }

    /// Add one instance, capped at the fleet maximum, to stage a replacement
    pub async fn scale_up_replacement(&self) -> Result<Option<u32>> {
        let Some(fleet_id) = self.fleet_id.as_deref() else {
            warn!("No fleet configured, cannot stage a replacement instance");
            return Ok(None);
        };
        let Some(state) = self.describe().await else {
            return Ok(None);
        };

        let target = state.current.saturating_add(1).min(state.max);
        self.set_desired(fleet_id, target).await?;
        info!(fleet_id = %fleet_id, capacity = target, "Scaled up to replace reclaimed instance");
        Ok(Some(target))
    }

    /// Instances whose mean utilization over the idle window is below `threshold`
    pub async fn idle_instances(&self, state: &CapacityState, threshold: f64) -> Vec<String> {
        let mut idle = Vec::new();
        for instance_id in &state.instances {
            if let Some(mean) = self
                .monitor
                .mean_utilization(instance_id, self.idle_window)
                .await
            {
                if mean < threshold {
                    info!(instance_id = %instance_id, mean = mean, "Instance is idle");
                    idle.push(instance_id.clone());
                }
            }
        }
        idle
    }

    async fn apply(
        &self,
        state: &CapacityState,
        decision: ScalingDecision,
        utilization: f64,
        predicted: Option<f64>,
    ) -> Result<ScalingOutcome> {
        let mut outcome = ScalingOutcome {
            action: decision.action,
            from: Some(state.current),
            to: Some(decision.target_capacity),
            applied: false,
            current_utilization: utilization,
            predicted_utilization: predicted,
            reasoning: decision.reasoning,
        };

        if decision.target_capacity == state.current {
            return Ok(outcome);
        }
        let Some(fleet_id) = self.fleet_id.as_deref() else {
            return Ok(outcome);
        };

        self.set_desired(fleet_id, decision.target_capacity).await?;
        outcome.applied = true;

        self.metrics.inc_scaling_action(decision.action.as_str());
        self.logger.log_scaling(
            fleet_id,
            state.current,
            decision.target_capacity,
            decision.action.as_str(),
            &outcome.reasoning,
        );

        let change = i64::from(decision.target_capacity) - i64::from(state.current);
        let record = ScalingRecord::new(Utc::now(), utilization, change, self.monitor.instance_id());
        if let Err(e) = self.history.append(&record).await {
            warn!(error = %e, "Error recording scaling action");
        }

        Ok(outcome)
    }

    async fn set_desired(&self, fleet_id: &str, desired: u32) -> Result<()> {
        bounded("fleet", self.timeout, self.fleet.set_desired(fleet_id, desired))
            .await
            .with_context(|| format!("Failed to set desired capacity of {} to {}", fleet_id, desired))
    }
}
