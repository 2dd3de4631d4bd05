//! In-memory collaborators shared by unit tests

use crate::collaborators::{
    async_trait, CollabResult, FleetManager, InstanceMetadata, MarketData, MetricQuery,
    MetricsService, NotificationSink, ReportSink, Severity, StorageInventory, WorkloadControl,
};
use crate::config::OptimizerConfig;
use crate::context::{Collaborators, OptimizerContext};
use crate::error::CollaboratorError;
use crate::models::{
    CapacityState, Datapoint, PreemptionNotice, PriceQuote, PriceSource, SnapshotInfo, VolumeInfo,
};
use crate::orchestrator::CostReport;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub struct FakeMarket {
    pub spot: Mutex<HashMap<String, f64>>,
    pub reference: Mutex<HashMap<String, f64>>,
    pub failing: AtomicBool,
}

impl FakeMarket {
    pub fn new(spot: &[(&str, f64)], reference: &[(&str, f64)]) -> Self {
        let map = |v: &[(&str, f64)]| v.iter().map(|(k, p)| (k.to_string(), *p)).collect();
        Self {
            spot: Mutex::new(map(spot)),
            reference: Mutex::new(map(reference)),
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn spot_prices(&self, classes: &[String], _window: Duration) -> CollabResult<Vec<PriceQuote>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::transport("market-data", "down"));
        }
        let spot = self.spot.lock().unwrap();
        Ok(classes
            .iter()
            .filter_map(|c| {
                spot.get(c).map(|p| PriceQuote {
                    instance_class: c.clone(),
                    price_per_hour: *p,
                    observed_at: Utc::now(),
                    source: PriceSource::Market,
                    stale: false,
                })
            })
            .collect())
    }

    async fn reference_price(&self, class: &str, _region: &str) -> CollabResult<f64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::transport("market-data", "down"));
        }
        self.reference
            .lock()
            .unwrap()
            .get(class)
            .copied()
            .ok_or_else(|| CollaboratorError::unavailable("market-data", "unknown class"))
    }
}

/// One datapoint per instance with a fixed value, for every metric
pub struct FakeMetrics {
    pub by_instance: Mutex<HashMap<String, f64>>,
}

impl FakeMetrics {
    pub fn new(values: &[(&str, f64)]) -> Self {
        Self {
            by_instance: Mutex::new(values.iter().map(|(k, v)| (k.to_string(), *v)).collect()),
        }
    }
}

#[async_trait]
impl MetricsService for FakeMetrics {
    async fn statistics(&self, query: &MetricQuery) -> CollabResult<Vec<Datapoint>> {
        let instance = query
            .dimensions
            .first()
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        Ok(self
            .by_instance
            .lock()
            .unwrap()
            .get(&instance)
            .map(|v| {
                vec![Datapoint {
                    timestamp: Utc::now(),
                    average: *v,
                }]
            })
            .unwrap_or_default())
    }
}

pub struct FakeFleet {
    pub state: Mutex<Option<CapacityState>>,
    pub writes: Mutex<Vec<u32>>,
    pub fail_writes: AtomicBool,
    pub hang: AtomicBool,
}

impl FakeFleet {
    pub fn new(state: Option<CapacityState>) -> Self {
        Self {
            state: Mutex::new(state),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            hang: AtomicBool::new(false),
        }
    }

    pub fn desired(&self) -> Option<u32> {
        self.state.lock().unwrap().as_ref().map(|s| s.desired)
    }
}

#[async_trait]
impl FleetManager for FakeFleet {
    async fn describe(&self, _fleet_id: &str) -> CollabResult<Option<CapacityState>> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn set_desired(&self, _fleet_id: &str, desired: u32) -> CollabResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                service: "fleet",
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.writes.lock().unwrap().push(desired);
        if let Some(state) = self.state.lock().unwrap().as_mut() {
            state.desired = desired;
        }
        Ok(())
    }
}

pub struct FakeMetadata {
    pub notice: Mutex<Option<PreemptionNotice>>,
    pub polls: AtomicUsize,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self {
            notice: Mutex::new(None),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn post_notice(&self, seconds_from_now: i64) {
        *self.notice.lock().unwrap() = Some(PreemptionNotice {
            action: "terminate".to_string(),
            termination_time: Some(Utc::now() + chrono::Duration::seconds(seconds_from_now)),
        });
    }
}

#[async_trait]
impl InstanceMetadata for FakeMetadata {
    async fn self_id(&self) -> CollabResult<String> {
        Ok("i-self".to_string())
    }

    async fn preemption_notice(&self) -> CollabResult<Option<PreemptionNotice>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.notice.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(Severity, String)>>,
    pub hang: AtomicBool,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn publish(&self, severity: Severity, subject: &str, _message: &str) -> CollabResult<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.messages
            .lock()
            .unwrap()
            .push((severity, subject.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWorkloads {
    pub calls: Mutex<Vec<&'static str>>,
    pub hang: AtomicBool,
    pub fail: AtomicBool,
    pub stop_delay: Mutex<Duration>,
}

impl FakeWorkloads {
    async fn call(&self, name: &'static str) -> CollabResult<()> {
        self.calls.lock().unwrap().push(name);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("workloads", "hook failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadControl for FakeWorkloads {
    async fn quiesce(&self, _timeout: Duration) -> CollabResult<()> {
        self.call("quiesce").await
    }

    async fn flush(&self, _timeout: Duration) -> CollabResult<()> {
        self.call("flush").await
    }

    async fn backup(&self, _timeout: Duration) -> CollabResult<()> {
        self.call("backup").await
    }

    async fn stop_non_essential(&self, _timeout: Duration) -> CollabResult<usize> {
        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.call("stop_non_essential").await.map(|_| 1)
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub volumes: Vec<VolumeInfo>,
    pub snapshots: Vec<SnapshotInfo>,
    pub failing: AtomicBool,
}

#[async_trait]
impl StorageInventory for FakeStorage {
    async fn attached_volumes(&self, _instance_id: &str) -> CollabResult<Vec<VolumeInfo>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::transport("storage", "down"));
        }
        Ok(self.volumes.clone())
    }

    async fn unattached_volumes(&self) -> CollabResult<Vec<VolumeInfo>> {
        Ok(Vec::new())
    }

    async fn snapshots(&self) -> CollabResult<Vec<SnapshotInfo>> {
        Ok(self.snapshots.clone())
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> CollabResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReports {
    pub reports: Mutex<Vec<CostReport>>,
    pub failing: AtomicBool,
}

#[async_trait]
impl ReportSink for MemoryReports {
    async fn persist(&self, report: &CostReport) -> CollabResult<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("report-sink", "disk full"));
        }
        let mut reports = self.reports.lock().unwrap();
        reports.push(report.clone());
        Ok(format!("memory://{}", reports.len()))
    }
}

/// A fully wired context over in-memory collaborators
pub struct Fixture {
    pub dir: TempDir,
    pub market: Arc<FakeMarket>,
    pub metrics: Arc<FakeMetrics>,
    pub fleet: Arc<FakeFleet>,
    pub metadata: Arc<FakeMetadata>,
    pub notifier: Arc<RecordingNotifier>,
    pub workloads: Arc<FakeWorkloads>,
    pub storage: Arc<FakeStorage>,
    pub reports: Arc<MemoryReports>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            market: Arc::new(FakeMarket::new(
                &[("g4dn.xlarge", 0.45), ("g5.xlarge", 0.60)],
                &[("g4dn.xlarge", 1.19), ("g5.xlarge", 1.21)],
            )),
            metrics: Arc::new(FakeMetrics::new(&[("i-self", 55.0)])),
            fleet: Arc::new(FakeFleet::new(Some(CapacityState {
                current: 2,
                min: 1,
                max: 4,
                desired: 2,
                instances: vec!["i-self".to_string(), "i-peer".to_string()],
            }))),
            metadata: Arc::new(FakeMetadata::new()),
            notifier: Arc::new(RecordingNotifier::default()),
            workloads: Arc::new(FakeWorkloads::default()),
            storage: Arc::new(FakeStorage::default()),
            reports: Arc::new(MemoryReports::default()),
        }
    }

    pub fn config(&self) -> OptimizerConfig {
        let mut config = OptimizerConfig {
            fleet_id: Some("gpu-fleet".to_string()),
            ..Default::default()
        };
        config.paths.price_cache = self.dir.path().join("prices.json");
        config.paths.telemetry_snapshot = self.dir.path().join("gpu_metrics.json");
        config.paths.scaling_history = self.dir.path().join("scaling.jsonl");
        config.paths.scaling_history_fallback = self.dir.path().join("scaling-fallback.jsonl");
        config.paths.report_dir = self.dir.path().to_path_buf();
        config.timeouts.api_secs = 5;
        config.timeouts.drain_step_secs = 10;
        config
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            market: self.market.clone(),
            metrics: self.metrics.clone(),
            fleet: self.fleet.clone(),
            metadata: self.metadata.clone(),
            notifier: self.notifier.clone(),
            workloads: self.workloads.clone(),
            storage: self.storage.clone(),
            reports: self.reports.clone(),
        }
    }

    pub async fn context(&self) -> Arc<OptimizerContext> {
        self.context_with(self.config()).await
    }

    pub async fn context_with(&self, config: OptimizerConfig) -> Arc<OptimizerContext> {
        OptimizerContext::build(config, self.collaborators())
            .await
            .unwrap()
    }
}
