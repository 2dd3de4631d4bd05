//! Fault-isolating optimization cycle

use crate::health::{components, HealthRegistry};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::preemption::{DrainReport, PreemptionHandler};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub type StepFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;
pub type StepFn = Arc<dyn Fn() -> StepFuture + Send + Sync>;

/// A named unit of work inside a cycle
#[derive(Clone)]
pub struct CycleStep {
    name: &'static str,
    run: StepFn,
}

impl CycleStep {
    pub fn new<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name,
            run: Arc::new(move || Box::pin(f()) as StepFuture),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for CycleStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleStep").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Every step succeeded
    Completed,
    /// At least one step failed
    Partial,
    /// The instance is being reclaimed; remaining steps were not run
    Aborted,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::Partial => "partial",
            CycleStatus::Aborted => "aborted",
        }
    }
}

/// Structured outcome of one cycle, immutable once returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub started_at: DateTime<Utc>,
    pub status: CycleStatus,
    pub steps: Vec<StepOutcome>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemption: Option<DrainReport>,
}

impl CycleResult {
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }

    pub fn failed(&self) -> Vec<&StepOutcome> {
        self.steps.iter().filter(|s| !s.success).collect()
    }
}

/// Runs every step in order, isolating failures and panics per step
pub struct CycleOrchestrator {
    preemption: Arc<PreemptionHandler>,
    steps: Vec<CycleStep>,
    health: HealthRegistry,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl CycleOrchestrator {
    pub fn new(
        preemption: Arc<PreemptionHandler>,
        steps: Vec<CycleStep>,
        health: HealthRegistry,
        instance_id: &str,
    ) -> Self {
        Self {
            preemption,
            steps,
            health,
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::new(instance_id),
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    pub async fn run_cycle(&self) -> CycleResult {
        let started_at = Utc::now();
        let started = Instant::now();
        info!("Starting cost optimization cycle");

        if self.preemption.check().await {
            warn!("Spot termination detected, aborting optimization cycle");
            return self.aborted(started_at, started, Vec::new()).await;
        }

        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if self.preemption.is_tripped() {
                warn!(next_step = step.name, "Spot termination detected mid-cycle, aborting");
                return self.aborted(started_at, started, outcomes).await;
            }
            outcomes.push(self.run_step(step).await);
        }

        let status = if outcomes.iter().all(|o| o.success) {
            CycleStatus::Completed
        } else {
            CycleStatus::Partial
        };

        let result = CycleResult {
            started_at,
            status,
            steps: outcomes,
            duration_secs: started.elapsed().as_secs_f64(),
            preemption: None,
        };
        self.finish(&result).await;
        result
    }

    async fn run_step(&self, step: &CycleStep) -> StepOutcome {
        let started = Instant::now();
        info!(step = step.name, "Starting step");

        // Own task so a panic is contained to this step
        let joined = tokio::spawn((step.run)()).await;

        let (output, error) = match joined {
            Ok(Ok(value)) => (Some(value), None),
            Ok(Err(e)) => (None, Some(format!("{:#}", e))),
            Err(e) if e.is_panic() => (None, Some(format!("step panicked: {}", panic_message(e)))),
            Err(e) => (None, Some(format!("step cancelled: {}", e))),
        };

        let duration_secs = started.elapsed().as_secs_f64();
        match &error {
            None => info!(step = step.name, duration_secs = duration_secs, "Step completed successfully"),
            Some(e) => {
                error!(step = step.name, error = %e, duration_secs = duration_secs, "Step failed");
                self.metrics.inc_step_failure(step.name);
            }
        }

        StepOutcome {
            step: step.name.to_string(),
            success: error.is_none(),
            error,
            duration_secs,
            output,
        }
    }

    async fn aborted(
        &self,
        started_at: DateTime<Utc>,
        started: Instant,
        steps: Vec<StepOutcome>,
    ) -> CycleResult {
        let result = CycleResult {
            started_at,
            status: CycleStatus::Aborted,
            steps,
            duration_secs: started.elapsed().as_secs_f64(),
            preemption: self.preemption.report(),
        };
        self.health
            .set_unhealthy(components::PREEMPTION, "instance is being reclaimed")
            .await;
        self.finish(&result).await;
        result
    }

    async fn finish(&self, result: &CycleResult) {
        self.metrics
            .observe_cycle(result.duration_secs, result.status.as_str());
        self.logger.log_cycle(
            result.status.as_str(),
            result.succeeded(),
            self.steps.len(),
            result.duration_secs,
        );

        match result.status {
            CycleStatus::Completed => self.health.set_healthy(components::CYCLE).await,
            CycleStatus::Partial => {
                let failed: Vec<&str> = result.failed().iter().map(|s| s.step.as_str()).collect();
                self.health
                    .set_degraded(components::CYCLE, format!("failed steps: {}", failed.join(", ")))
                    .await
            }
            CycleStatus::Aborted => {
                self.health
                    .set_degraded(components::CYCLE, "cycle aborted by reclamation notice")
                    .await
            }
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}
