//! Escalation actions driven by the guardrail tier

use super::budget::{classify, evaluate, BudgetCalendar, BudgetStatus, GuardrailTier};
use crate::advisory::{CostMonitor, ResourceCleaner, EMERGENCY_RETENTION};
use crate::collaborators::{bounded, WorkloadControl};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::pricing::SpotPricingOptimizer;
use crate::scaling::{FleetScaler, ScalingPolicy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Outcome of one corrective action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActionResult {
    fn ok(action: &str, detail: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            detail: Some(detail.into()),
        }
    }

    fn failed(action: &str, err: impl std::fmt::Display) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            detail: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailReport {
    pub status: BudgetStatus,
    pub tier: GuardrailTier,
    pub actions: Vec<ActionResult>,
    pub low_daily_budget: bool,
}

/// Tracks estimated spend against the monthly budget and escalates.
///
/// Tiers are recomputed on every run, so each action must tolerate being
/// triggered again on the next pass.
pub struct BudgetGuardrail {
    costs: Arc<CostMonitor>,
    pricing: Arc<SpotPricingOptimizer>,
    scaler: Arc<FleetScaler>,
    cleaner: Arc<ResourceCleaner>,
    workloads: Arc<dyn WorkloadControl>,
    limit: f64,
    base_policy: ScalingPolicy,
    service_stop_timeout: Duration,
    non_essential_services: usize,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl BudgetGuardrail {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        costs: Arc<CostMonitor>,
        pricing: Arc<SpotPricingOptimizer>,
        scaler: Arc<FleetScaler>,
        cleaner: Arc<ResourceCleaner>,
        workloads: Arc<dyn WorkloadControl>,
        limit: f64,
        base_policy: ScalingPolicy,
        service_stop_timeout: Duration,
        non_essential_services: usize,
        instance_id: &str,
    ) -> Self {
        Self {
            costs,
            pricing,
            scaler,
            cleaner,
            workloads,
            limit,
            base_policy,
            service_stop_timeout,
            non_essential_services,
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::new(instance_id),
        }
    }

    /// Current budget status from today's daily estimate
    pub async fn check_budget(&self) -> BudgetStatus {
        let daily = self.costs.daily_cost_estimate().await;
        let status = evaluate(
            daily,
            self.limit,
            BudgetCalendar::for_date(Utc::now().date_naive()),
        );

        if status.utilization_pct > 80.0 {
            warn!(
                utilization_pct = status.utilization_pct,
                "Budget alert: monthly budget mostly used"
            );
        }
        if status.projected_overage > 0.0 {
            error!(
                projected_overage = status.projected_overage,
                "Budget overage projected"
            );
        }
        status
    }

    /// Evaluate the budget and run the actions of the resulting tier
    pub async fn run(&self) -> GuardrailReport {
        let status = self.check_budget().await;
        let tier = classify(&status);

        self.metrics.set_guardrail_tier(tier.level());
        self.logger
            .log_guardrail(tier.as_str(), status.utilization_pct, status.projected_overage);

        let actions = match tier {
            GuardrailTier::Emergency => self.emergency().await,
            GuardrailTier::Preventive => self.preventive().await,
            GuardrailTier::Normal => Vec::new(),
        };

        let low_daily_budget = status.daily_budget_remaining < self.costs.threshold() * 0.5;
        if low_daily_budget {
            warn!(
                daily_budget_remaining = status.daily_budget_remaining,
                "Daily budget remaining low"
            );
        }

        GuardrailReport {
            status,
            tier,
            actions,
            low_daily_budget,
        }
    }

    /// Each sub-action runs regardless of the others failing
    async fn emergency(&self) -> Vec<ActionResult> {
        let mut actions = Vec::with_capacity(3);

        actions.push(match self.scaler.scale_to_minimum().await {
            Ok(Some(capacity)) => {
                ActionResult::ok("emergency_scale_down", format!("desired capacity {}", capacity))
            }
            Ok(None) => ActionResult::failed("emergency_scale_down", "no fleet available"),
            Err(e) => ActionResult::failed("emergency_scale_down", format!("{:#}", e)),
        });

        // Each service gets the full stop timeout
        let stop_budget = self
            .service_stop_timeout
            .saturating_mul(self.non_essential_services.max(1) as u32);
        actions.push(
            match bounded(
                "workloads",
                stop_budget,
                self.workloads.stop_non_essential(self.service_stop_timeout),
            )
            .await
            {
                Ok(stopped) => {
                    ActionResult::ok("stop_non_essential", format!("{} services stopped", stopped))
                }
                Err(e) => ActionResult::failed("stop_non_essential", e),
            },
        );

        actions.push(match self.cleaner.cleanup(EMERGENCY_RETENTION).await {
            Ok(report) => ActionResult::ok(
                "resource_cleanup",
                format!("{} cleanup candidates", report.candidates()),
            ),
            Err(e) => ActionResult::failed("resource_cleanup", format!("{:#}", e)),
        });

        for action in actions.iter().filter(|a| !a.success) {
            warn!(action = %action.action, detail = ?action.detail, "Emergency action failed");
        }
        actions
    }

    /// Price arbitrage plus one scaling pass under a stricter policy.
    /// The configured policy is never modified.
    async fn preventive(&self) -> Vec<ActionResult> {
        let mut actions = Vec::with_capacity(2);

        let pricing = self.pricing.optimize().await;
        actions.push(ActionResult::ok(
            "spot_pricing",
            match pricing.recommended_switch {
                Some(class) => format!("recommend {}", class),
                None => "no better class".to_string(),
            },
        ));

        let strict = self.base_policy.tightened();
        actions.push(match self.scaler.auto_scale(&strict).await {
            Ok(outcome) => ActionResult::ok("aggressive_scaling", outcome.reasoning),
            Err(e) => ActionResult::failed("aggressive_scaling", format!("{:#}", e)),
        });

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    const DAILY: f64 = 0.45 * 24.0;

    #[tokio::test]
    async fn test_normal_tier_takes_no_action() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.budget_limit = 1_000_000.0;
        let ctx = fixture.context_with(config).await;

        let report = ctx.guardrail.run().await;

        assert_eq!(report.tier, GuardrailTier::Normal);
        assert!(report.actions.is_empty());
        assert!(!report.low_daily_budget);
        assert!(fixture.fleet.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_runs_every_action() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.budget_limit = 1.0;
        let ctx = fixture.context_with(config).await;

        let report = ctx.guardrail.run().await;

        assert_eq!(report.tier, GuardrailTier::Emergency);
        let names: Vec<&str> = report.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(
            names,
            vec!["emergency_scale_down", "stop_non_essential", "resource_cleanup"]
        );
        assert!(report.actions.iter().all(|a| a.success));
        assert_eq!(fixture.fleet.desired(), Some(1));
        assert_eq!(
            *fixture.workloads.calls.lock().unwrap(),
            vec!["stop_non_essential"]
        );
        assert!(report.low_daily_budget);
    }

    #[tokio::test]
    async fn test_emergency_actions_are_independent() {
        let fixture = Fixture::new();
        fixture
            .fleet
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let mut config = fixture.config();
        config.budget_limit = 1.0;
        let ctx = fixture.context_with(config).await;

        let report = ctx.guardrail.run().await;

        assert!(!report.actions[0].success);
        assert!(report.actions[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("Failed to set desired capacity"));
        assert!(report.actions[1].success);
        assert!(report.actions[2].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_budget_covers_every_service() {
        let fixture = Fixture::new();
        // Longer than one service timeout, shorter than three
        *fixture.workloads.stop_delay.lock().unwrap() = Duration::from_secs(25);
        let mut config = fixture.config();
        config.budget_limit = 1.0;
        config.workloads.non_essential_services =
            vec!["jupyter".to_string(), "tensorboard".to_string(), "grafana".to_string()];
        let ctx = fixture.context_with(config).await;

        let report = ctx.guardrail.run().await;

        let stop = &report.actions[1];
        assert_eq!(stop.action, "stop_non_essential");
        assert!(stop.success, "stop cut short: {:?}", stop.detail);
    }

    #[tokio::test]
    async fn test_preventive_uses_tightened_policy_once() {
        let fixture = Fixture::new();
        // 65% is under the configured 70% target but over the tightened 60%
        fixture
            .metrics
            .by_instance
            .lock()
            .unwrap()
            .insert("i-self".to_string(), 65.0);

        // Size the limit so month-to-date spend sits at 85% of it
        let calendar = BudgetCalendar::for_date(Utc::now().date_naive());
        let mut config = fixture.config();
        config.budget_limit = DAILY * f64::from(calendar.days_elapsed) / 0.85;
        let ctx = fixture.context_with(config).await;

        let report = ctx.guardrail.run().await;

        assert_eq!(report.tier, GuardrailTier::Preventive);
        let names: Vec<&str> = report.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(names, vec!["spot_pricing", "aggressive_scaling"]);
        assert_eq!(*fixture.fleet.writes.lock().unwrap(), vec![3]);

        // The configured policy is untouched
        assert_eq!(ctx.scaling_policy(), ScalingPolicy::new(70.0, 20.0));
        let outcome = ctx.auto_scale().await.unwrap();
        assert!(!outcome.applied);
    }
}
