//! Reclamation notice detection and the time-boxed drain protocol

use crate::collaborators::{bounded, InstanceMetadata, NotificationSink, Severity, WorkloadControl};
use crate::models::PreemptionNotice;
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::scaling::FleetScaler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Notice window assumed when the notice carries no termination time
pub const MINIMUM_NOTICE: Duration = Duration::from_secs(120);

/// Share of the notice window the drain sequence may use
pub const DRAIN_WINDOW_FRACTION: f64 = 0.25;

/// Bounded calls made while draining
const DRAIN_CALLS: u32 = 5;

/// Floor for a single drain call so the alert always gets a chance
const MIN_STEP_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of the handler. Never returns to `Watching` once a notice is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptionState {
    Watching,
    NoticeDetected,
    Draining,
    Done,
}

/// Outcome of one drain call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainStep {
    pub step: String,
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub notice: PreemptionNotice,
    pub detected_at: DateTime<Utc>,
    pub time_remaining_secs: f64,
    pub step_timeout_secs: f64,
    pub steps: Vec<DrainStep>,
    pub elapsed_secs: f64,
}

impl DrainReport {
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.success).count()
    }
}

#[derive(Debug)]
struct Inner {
    state: PreemptionState,
    report: Option<DrainReport>,
}

/// Watches for a reclamation notice and drains the instance exactly once.
pub struct PreemptionHandler {
    metadata: Arc<dyn InstanceMetadata>,
    notifier: Arc<dyn NotificationSink>,
    workloads: Arc<dyn WorkloadControl>,
    scaler: Arc<FleetScaler>,
    poll_timeout: Duration,
    step_cap: Duration,
    instance_id: String,
    region: String,
    tripped: AtomicBool,
    inner: Mutex<Inner>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl PreemptionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<dyn InstanceMetadata>,
        notifier: Arc<dyn NotificationSink>,
        workloads: Arc<dyn WorkloadControl>,
        scaler: Arc<FleetScaler>,
        poll_timeout: Duration,
        step_cap: Duration,
        instance_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let instance_id = instance_id.into();
        Self {
            metadata,
            notifier,
            workloads,
            scaler,
            poll_timeout,
            step_cap,
            logger: StructuredLogger::new(instance_id.clone()),
            instance_id,
            region: region.into(),
            tripped: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: PreemptionState::Watching,
                report: None,
            }),
            metrics: OptimizerMetrics::new(),
        }
    }

    pub fn state(&self) -> PreemptionState {
        self.lock().state
    }

    /// True once a reclamation notice has been detected
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Drain outcome, available once the handler is `Done`
    pub fn report(&self) -> Option<DrainReport> {
        self.lock().report.clone()
    }

    /// Poll once and drain if a notice is found. Returns whether the instance
    /// is being reclaimed. Poll failures count as "no notice".
    pub async fn check(&self) -> bool {
        if self.is_tripped() {
            return true;
        }

        let notice = match bounded(
            "instance-metadata",
            self.poll_timeout,
            self.metadata.preemption_notice(),
        )
        .await
        {
            Ok(Some(notice)) if notice.is_reclamation() => notice,
            Ok(Some(notice)) => {
                debug!(action = %notice.action, "Ignoring non-reclamation instance action");
                return false;
            }
            Ok(None) => return false,
            Err(e) => {
                debug!(error = %e, "Reclamation notice check failed");
                return false;
            }
        };

        // Only the caller that flips the flag drains
        if self
            .tripped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        self.drain(notice).await;
        true
    }

    /// Poll on a fixed interval until a notice is handled or shutdown
    pub async fn watch(self: Arc<Self>, poll_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = poll_interval.as_secs(),
            "Starting reclamation notice watch"
        );

        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.check().await {
                        info!(state = ?self.state(), "Reclamation handled, stopping notice watch");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reclamation notice watch");
                    break;
                }
            }
        }
    }

    async fn drain(&self, notice: PreemptionNotice) {
        let detected_at = Utc::now();
        let started = Instant::now();
        self.set_state(PreemptionState::NoticeDetected);
        self.metrics.inc_preemption_notices();

        let time_remaining = notice
            .termination_time
            .map(|t| {
                t.signed_duration_since(detected_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(MINIMUM_NOTICE);
        self.logger
            .log_preemption(&notice.action, time_remaining.as_secs_f64());

        let budget = time_remaining.mul_f64(DRAIN_WINDOW_FRACTION);
        let step_timeout = (budget / DRAIN_CALLS).clamp(MIN_STEP_TIMEOUT, self.step_cap.max(MIN_STEP_TIMEOUT));
        let deadline = started + step_timeout * DRAIN_CALLS;

        self.set_state(PreemptionState::Draining);

        let message = self.alert_message(&notice, time_remaining);
        let mut steps = Vec::with_capacity(DRAIN_CALLS as usize);

        steps.push(
            run_step("alert", step_timeout, deadline, async {
                self.notifier
                    .publish(Severity::Critical, "Spot termination notice", &message)
                    .await
            })
            .await,
        );
        steps.push(
            run_step("quiesce", step_timeout, deadline, self.workloads.quiesce(step_timeout)).await,
        );
        steps.push(
            run_step("flush", step_timeout, deadline, self.workloads.flush(step_timeout)).await,
        );
        steps.push(
            run_step("scale_up_replacement", step_timeout, deadline, async {
                match self.scaler.scale_up_replacement().await {
                    Ok(Some(capacity)) => Ok(capacity),
                    Ok(None) => Err(anyhow::anyhow!("no fleet available for a replacement")),
                    Err(e) => Err(e),
                }
            })
            .await,
        );
        steps.push(
            run_step("backup", step_timeout, deadline, self.workloads.backup(step_timeout)).await,
        );

        let elapsed = started.elapsed();
        self.metrics.observe_drain(elapsed.as_secs_f64());

        let report = DrainReport {
            notice,
            detected_at,
            time_remaining_secs: time_remaining.as_secs_f64(),
            step_timeout_secs: step_timeout.as_secs_f64(),
            steps,
            elapsed_secs: elapsed.as_secs_f64(),
        };

        if report.failed_steps() > 0 {
            warn!(
                failed = report.failed_steps(),
                elapsed_secs = report.elapsed_secs,
                "Drain completed with failures"
            );
        } else {
            info!(
                elapsed_secs = report.elapsed_secs,
                "Emergency procedures completed, instance ready for termination"
            );
        }

        let mut inner = self.lock();
        inner.report = Some(report);
        inner.state = PreemptionState::Done;
    }

    fn alert_message(&self, notice: &PreemptionNotice, time_remaining: Duration) -> String {
        format!(
            "URGENT: spot instance termination notice\n\nInstance: {}\nRegion: {}\n\
             Termination time: {}\nSeconds remaining: {:.0}\nDetected: {}\n\n\
             Draining workloads, staging a replacement and creating an emergency backup. \
             Cost optimization is suspended on this instance.",
            self.instance_id,
            self.region,
            notice
                .termination_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
            time_remaining.as_secs_f64(),
            Utc::now().to_rfc3339()
        )
    }

    fn set_state(&self, state: PreemptionState) {
        self.lock().state = state;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one drain call under its own timeout, skipping it past the deadline
async fn run_step<T, E, F>(name: &str, timeout: Duration, deadline: Instant, call: F) -> DrainStep
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    if started >= deadline {
        warn!(step = %name, "Drain deadline passed, skipping step");
        return DrainStep {
            step: name.to_string(),
            success: false,
            skipped: true,
            error: Some("drain deadline passed".to_string()),
            duration_secs: 0.0,
        };
    }

    let limit = timeout.min(deadline - started);
    let error = match tokio::time::timeout(limit, call).await {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(_) => Some(format!("timed out after {:?}", limit)),
    };

    if let Some(e) = &error {
        error!(step = %name, error = %e, "Drain step failed");
    } else {
        info!(step = %name, "Drain step completed");
    }

    DrainStep {
        step: name.to_string(),
        success: error.is_none(),
        skipped: false,
        error,
        duration_secs: started.elapsed().as_secs_f64(),
    }
}
