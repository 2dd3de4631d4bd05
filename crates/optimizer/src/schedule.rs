//! Periodic execution of individual optimizer operations
//!
//! Every operation runs on its own task with its own cadence. The
//! reclamation watch has a dedicated task so a slow cycle never delays
//! notice detection.

use anyhow::Result;
use optimizer_lib::config::ScheduleConfig;
use optimizer_lib::context::OptimizerContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AutoScaling,
    PatternScaling,
    SpotPricing,
    BudgetCheck,
    Guardrail,
    Cleanup,
    Report,
    ProfileRefresh,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::AutoScaling,
        Operation::PatternScaling,
        Operation::SpotPricing,
        Operation::BudgetCheck,
        Operation::Guardrail,
        Operation::Cleanup,
        Operation::Report,
        Operation::ProfileRefresh,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::AutoScaling => "auto_scaling",
            Operation::PatternScaling => "usage_pattern_scaling",
            Operation::SpotPricing => "spot_pricing",
            Operation::BudgetCheck => "budget_check",
            Operation::Guardrail => "cost_guardrails",
            Operation::Cleanup => "resource_cleanup",
            Operation::Report => "report_generation",
            Operation::ProfileRefresh => "profile_refresh",
        }
    }

    pub fn cadence(&self, schedule: &ScheduleConfig) -> Duration {
        let secs = match self {
            Operation::AutoScaling => schedule.auto_scaling_secs,
            Operation::PatternScaling => schedule.pattern_scaling_secs,
            Operation::SpotPricing => schedule.spot_pricing_secs,
            Operation::BudgetCheck => schedule.budget_check_secs,
            Operation::Guardrail => schedule.guardrail_secs,
            Operation::Cleanup => schedule.cleanup_secs,
            Operation::Report => schedule.report_secs,
            Operation::ProfileRefresh => schedule.profile_refresh_secs,
        };
        Duration::from_secs(secs)
    }

    async fn run(&self, ctx: &OptimizerContext) -> Result<()> {
        match self {
            Operation::AutoScaling => {
                ctx.auto_scale().await?;
            }
            Operation::PatternScaling => {
                ctx.pattern_scale().await?;
            }
            Operation::SpotPricing => {
                ctx.optimize_spot_pricing().await;
            }
            Operation::BudgetCheck => {
                ctx.check_budget().await;
            }
            Operation::Guardrail => {
                ctx.run_guardrail().await;
            }
            Operation::Cleanup => {
                ctx.cleanup().await?;
            }
            Operation::Report => {
                ctx.generate_and_save_report().await?;
            }
            Operation::ProfileRefresh => {
                ctx.refresh_profile().await;
            }
        }
        Ok(())
    }
}

/// Handles of the running periodic tasks
pub struct Scheduler {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(ctx: Arc<OptimizerContext>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let schedule = &ctx.config.schedule;

        let mut handles = Vec::with_capacity(Operation::ALL.len() + 1);
        handles.push(tokio::spawn(ctx.preemption.clone().watch(
            Duration::from_secs(schedule.preemption_poll_secs),
            shutdown.subscribe(),
        )));

        for op in Operation::ALL {
            let cadence = op.cadence(schedule);
            handles.push(tokio::spawn(run_periodically(
                ctx.clone(),
                op,
                cadence,
                shutdown.subscribe(),
            )));
        }

        info!(tasks = handles.len(), "Scheduler started");
        Self { shutdown, handles }
    }

    pub async fn shutdown(self) {
        // Err only means every task already exited
        let _ = self.shutdown.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduled task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_periodically(
    ctx: Arc<OptimizerContext>,
    op: Operation,
    cadence: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(operation = op.name(), cadence_secs = cadence.as_secs(), "Operation scheduled");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if ctx.preemption.is_tripped() {
                    warn!(operation = op.name(), "Instance is being reclaimed, skipping");
                    continue;
                }
                match op.run(&ctx).await {
                    Ok(()) => debug!(operation = op.name(), "Scheduled operation completed"),
                    Err(e) => error!(operation = op.name(), error = %format!("{:#}", e), "Scheduled operation failed"),
                }
            }
            _ = shutdown.recv() => {
                debug!(operation = op.name(), "Stopping scheduled operation");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_cadences() {
        let schedule = ScheduleConfig::default();
        assert_eq!(
            Operation::AutoScaling.cadence(&schedule),
            Duration::from_secs(15 * 60)
        );
        assert_eq!(
            Operation::PatternScaling.cadence(&schedule),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(
            Operation::Guardrail.cadence(&schedule),
            Duration::from_secs(4 * 60 * 60)
        );
        assert_eq!(
            Operation::Report.cadence(&schedule),
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[test]
    fn test_operation_names_unique() {
        let names: HashSet<&str> = Operation::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), Operation::ALL.len());
    }
}
