//! Process-wide optimizer context
//!
//! Built once at startup from the validated configuration and the concrete
//! collaborators, then shared by the orchestrator, the scheduler and the
//! preemption watch.

use crate::advisory::{
    CleanupReport, CostCheck, CostMonitor, ResourceCleaner, StorageAdvice, StorageAdvisor,
    STANDARD_RETENTION,
};
use crate::collaborators::{
    bounded, FleetManager, InstanceMetadata, MarketData, MetricsService, NotificationSink,
    ReportSink, StorageInventory, WorkloadControl,
};
use crate::config::OptimizerConfig;
use crate::guardrail::{BudgetGuardrail, BudgetStatus, GuardrailReport};
use crate::health::{components, HealthRegistry};
use crate::observability::StructuredLogger;
use crate::orchestrator::{standard_steps, CostReport, CostReportBuilder, CycleOrchestrator};
use crate::predictor::{UsagePatternPredictor, UsageProfile};
use crate::preemption::PreemptionHandler;
use crate::pricing::{
    PriceCache, PriceOracle, PriceOrigin, SpotPricingOptimizer, SpotPricingReport,
    REFERENCE_FRESHNESS,
};
use crate::scaling::{FleetScaler, ScalingHistoryLog, ScalingOutcome, ScalingPolicy};
use crate::telemetry::{TelemetrySnapshot, UtilizationMonitor};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Handles to every external system
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketData>,
    pub metrics: Arc<dyn MetricsService>,
    pub fleet: Arc<dyn FleetManager>,
    pub metadata: Arc<dyn InstanceMetadata>,
    pub notifier: Arc<dyn NotificationSink>,
    pub workloads: Arc<dyn WorkloadControl>,
    pub storage: Arc<dyn StorageInventory>,
    pub reports: Arc<dyn ReportSink>,
}

pub struct OptimizerContext {
    pub config: Arc<OptimizerConfig>,
    pub instance_id: String,
    pub health: HealthRegistry,
    pub oracle: Arc<PriceOracle>,
    pub monitor: Arc<UtilizationMonitor>,
    pub predictor: Arc<UsagePatternPredictor>,
    pub history: Arc<ScalingHistoryLog>,
    pub scaler: Arc<FleetScaler>,
    pub spot_pricing: Arc<SpotPricingOptimizer>,
    pub costs: Arc<CostMonitor>,
    pub storage: Arc<StorageAdvisor>,
    pub cleaner: Arc<ResourceCleaner>,
    pub guardrail: Arc<BudgetGuardrail>,
    pub preemption: Arc<PreemptionHandler>,
    reports: Arc<dyn ReportSink>,
    logger: StructuredLogger,
}

impl OptimizerContext {
    /// Validate the configuration and wire every component.
    ///
    /// Configuration errors are fatal here, before any cycle runs.
    pub async fn build(config: OptimizerConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate().context("Invalid optimizer configuration")?;
        let config = Arc::new(config);
        let timeouts = &config.timeouts;

        let instance_id = match bounded(
            "instance-metadata",
            timeouts.metadata(),
            collaborators.metadata.self_id(),
        )
        .await
        {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            Ok(_) => "unknown".to_string(),
            Err(e) => {
                warn!(error = %e, "Could not resolve instance id");
                "unknown".to_string()
            }
        };

        let health = HealthRegistry::new();
        health.register_all().await;

        let oracle = Arc::new(PriceOracle::new(
            collaborators.market.clone(),
            PriceCache::new(&config.paths.price_cache, REFERENCE_FRESHNESS),
            &config.region,
            timeouts.api(),
        ));

        let monitor = Arc::new(UtilizationMonitor::new(
            collaborators.metrics.clone(),
            TelemetrySnapshot::new(&config.paths.telemetry_snapshot),
            &instance_id,
            timeouts.api(),
        ));

        let predictor = Arc::new(UsagePatternPredictor::new(monitor.clone()));

        let history = Arc::new(ScalingHistoryLog::new(
            &config.paths.scaling_history,
            &config.paths.scaling_history_fallback,
        ));

        let scaler = Arc::new(FleetScaler::new(
            collaborators.fleet.clone(),
            config.fleet_id.clone(),
            monitor.clone(),
            predictor.clone(),
            history.clone(),
            timeouts.api(),
            config.idle_window(),
            Duration::from_secs(config.schedule.profile_refresh_secs),
        ));

        let spot_pricing = Arc::new(SpotPricingOptimizer::new(
            oracle.clone(),
            config.priced_classes(),
            &config.instance_class,
            config.max_spot_price,
        ));

        let costs = Arc::new(CostMonitor::new(
            oracle.clone(),
            collaborators.notifier.clone(),
            &config.instance_class,
            &instance_id,
            config.cost_alert_threshold,
            config.enable_cost_alerts,
            timeouts.api(),
        ));

        let storage = Arc::new(StorageAdvisor::new(
            collaborators.storage.clone(),
            &instance_id,
            timeouts.api(),
        ));

        let cleaner = Arc::new(ResourceCleaner::new(
            collaborators.storage.clone(),
            timeouts.api(),
            config.delete_expired_snapshots,
        ));

        let guardrail = Arc::new(BudgetGuardrail::new(
            costs.clone(),
            spot_pricing.clone(),
            scaler.clone(),
            cleaner.clone(),
            collaborators.workloads.clone(),
            config.budget_limit,
            ScalingPolicy::new(config.target_utilization, config.scale_down_threshold),
            timeouts.drain_step(),
            config.workloads.non_essential_services.len(),
            &instance_id,
        ));

        let preemption = Arc::new(PreemptionHandler::new(
            collaborators.metadata.clone(),
            collaborators.notifier.clone(),
            collaborators.workloads.clone(),
            scaler.clone(),
            timeouts.metadata(),
            timeouts.drain_step(),
            &instance_id,
            &config.region,
        ));

        info!(
            instance_id = %instance_id,
            region = %config.region,
            fleet_id = ?config.fleet_id,
            "Optimizer context ready"
        );

        Ok(Arc::new(Self {
            logger: StructuredLogger::new(&instance_id),
            config,
            instance_id,
            health,
            oracle,
            monitor,
            predictor,
            history,
            scaler,
            spot_pricing,
            costs,
            storage,
            cleaner,
            guardrail,
            preemption,
            reports: collaborators.reports,
        }))
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Configured scaling thresholds
    pub fn scaling_policy(&self) -> ScalingPolicy {
        ScalingPolicy::new(self.config.target_utilization, self.config.scale_down_threshold)
    }

    /// Orchestrator running the standard eight steps
    pub fn orchestrator(self: &Arc<Self>) -> CycleOrchestrator {
        CycleOrchestrator::new(
            self.preemption.clone(),
            standard_steps(self.clone()),
            self.health.clone(),
            &self.instance_id,
        )
    }

    pub async fn optimize_spot_pricing(&self) -> SpotPricingReport {
        let report = self.spot_pricing.optimize().await;

        if report.reference.origin != PriceOrigin::Live {
            self.health
                .set_degraded(
                    components::PRICING,
                    format!("reference prices from {}", report.reference.origin.as_str()),
                )
                .await;
        } else if report.spot_prices.is_empty() {
            self.health
                .set_degraded(components::PRICING, "no spot prices available")
                .await;
        } else {
            self.health.set_healthy(components::PRICING).await;
        }
        report
    }

    pub async fn auto_scale(&self) -> Result<ScalingOutcome> {
        let outcome = self.scaler.auto_scale(&self.scaling_policy()).await?;
        self.record_fleet_health(&outcome).await;
        Ok(outcome)
    }

    pub async fn pattern_scale(&self) -> Result<ScalingOutcome> {
        let outcome = self.scaler.pattern_scale().await?;
        self.record_fleet_health(&outcome).await;
        Ok(outcome)
    }

    pub async fn refresh_profile(&self) -> Arc<UsageProfile> {
        self.predictor.refresh().await
    }

    pub async fn storage_advice(&self) -> StorageAdvice {
        self.storage.advise().await
    }

    pub async fn monitor_costs(&self) -> CostCheck {
        self.costs.check().await
    }

    pub async fn check_budget(&self) -> BudgetStatus {
        self.guardrail.check_budget().await
    }

    pub async fn run_guardrail(&self) -> GuardrailReport {
        self.guardrail.run().await
    }

    /// Standard-retention cleanup; `None` when cleanup is disabled
    pub async fn cleanup(&self) -> Result<Option<CleanupReport>> {
        if !self.config.enable_auto_cleanup {
            info!("Automatic cleanup disabled");
            return Ok(None);
        }
        self.cleaner.cleanup(STANDARD_RETENTION).await.map(Some)
    }

    pub async fn generate_report(&self) -> CostReport {
        info!("Generating cost optimization report");

        let pricing = self.optimize_spot_pricing().await;
        let (reading, system) = tokio::join!(
            self.monitor.current_utilization(),
            self.monitor.system_utilization()
        );
        let daily_cost = self.costs.daily_cost_estimate().await;
        let budget = self.guardrail.check_budget().await;

        if reading.accelerator == 0.0 && reading.temperature == 0.0 {
            self.health
                .set_degraded(components::TELEMETRY, "no accelerator telemetry")
                .await;
        } else {
            self.health.set_healthy(components::TELEMETRY).await;
        }

        CostReportBuilder::new(&self.instance_id)
            .timestamp(Utc::now())
            .accelerator(reading)
            .system(system)
            .daily_cost(daily_cost, self.config.cost_alert_threshold)
            .budget(budget)
            .spot_prices(pricing.spot_prices)
            .savings(pricing.savings, pricing.reference.origin)
            .build()
    }

    /// Generate a report and hand it to the report sink. Returns the stored location.
    pub async fn generate_and_save_report(&self) -> Result<(CostReport, String)> {
        let report = self.generate_report().await;
        let location = bounded(
            "report-sink",
            self.config.timeouts.api(),
            self.reports.persist(&report),
        )
        .await
        .context("Failed to save cost report")?;

        info!(location = %location, "Cost report saved");
        Ok((report, location))
    }

    async fn record_fleet_health(&self, outcome: &ScalingOutcome) {
        if self.config.fleet_id.is_some() && outcome.from.is_none() {
            self.health
                .set_degraded(components::FLEET, "fleet unavailable")
                .await;
        } else {
            self.health.set_healthy(components::FLEET).await;
        }
    }
}
