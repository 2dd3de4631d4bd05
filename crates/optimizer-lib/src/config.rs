//! Optimizer configuration and startup validation

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Regions the optimizer is allowed to manage
pub const SUPPORTED_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-northeast-1",
    "ap-southeast-1",
];

/// Top-level optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_region")]
    pub region: String,

    /// Instance class the fleet currently runs
    #[serde(default = "default_instance_class")]
    pub instance_class: String,

    /// Classes considered for spot arbitrage
    #[serde(default = "default_candidate_classes")]
    pub candidate_classes: Vec<String>,

    /// Fleet managed by the external fleet manager; `None` disables scaling
    #[serde(default)]
    pub fleet_id: Option<String>,

    /// Spot price ceiling in USD/hour
    #[serde(default = "default_max_spot_price")]
    pub max_spot_price: f64,

    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,

    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,

    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,

    /// Daily cost alert threshold in USD
    #[serde(default = "default_cost_alert_threshold")]
    pub cost_alert_threshold: f64,

    /// Monthly budget in USD
    #[serde(default = "default_budget_limit")]
    pub budget_limit: f64,

    #[serde(default = "default_true")]
    pub enable_auto_cleanup: bool,

    #[serde(default = "default_true")]
    pub enable_cost_alerts: bool,

    /// Delete snapshots past retention instead of only reporting them
    #[serde(default)]
    pub delete_expired_snapshots: bool,

    #[serde(default = "default_fallback_regions")]
    pub fallback_regions: Vec<String>,

    #[serde(default)]
    pub endpoints: EndpointConfig,

    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub workloads: WorkloadHooks,
}

/// Collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Control-plane gateway serving prices, metrics, fleet and storage APIs
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    /// Alert webhook; alerts are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Local files the optimizer reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "default_price_cache")]
    pub price_cache: PathBuf,

    /// Shared telemetry snapshot maintained by the node agent
    #[serde(default = "default_telemetry_snapshot")]
    pub telemetry_snapshot: PathBuf,

    #[serde(default = "default_scaling_history")]
    pub scaling_history: PathBuf,

    #[serde(default = "default_scaling_history_fallback")]
    pub scaling_history_fallback: PathBuf,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

/// Call time budgets, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_metadata_timeout")]
    pub metadata_secs: u64,

    #[serde(default = "default_api_timeout")]
    pub api_secs: u64,

    /// Upper bound for each drain sub-step
    #[serde(default = "default_drain_step_timeout")]
    pub drain_step_secs: u64,
}

/// Cadences used by the `schedule` and `monitor` commands, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_auto_scaling_secs")]
    pub auto_scaling_secs: u64,
    #[serde(default = "default_pattern_scaling_secs")]
    pub pattern_scaling_secs: u64,
    #[serde(default = "default_spot_pricing_secs")]
    pub spot_pricing_secs: u64,
    #[serde(default = "default_budget_check_secs")]
    pub budget_check_secs: u64,
    #[serde(default = "default_guardrail_secs")]
    pub guardrail_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
    #[serde(default = "default_report_secs")]
    pub report_secs: u64,
    #[serde(default = "default_preemption_poll_secs")]
    pub preemption_poll_secs: u64,
    #[serde(default = "default_profile_refresh_secs")]
    pub profile_refresh_secs: u64,
}

/// Shell hooks run against managed workloads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadHooks {
    #[serde(default)]
    pub quiesce: Vec<String>,
    #[serde(default)]
    pub flush: Vec<String>,
    #[serde(default)]
    pub backup: Vec<String>,
    /// Services stopped during a budget emergency
    #[serde(default)]
    pub non_essential_services: Vec<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_instance_class() -> String {
    "g4dn.xlarge".to_string()
}

fn default_candidate_classes() -> Vec<String> {
    ["g4dn.xlarge", "g4dn.2xlarge", "g4ad.xlarge", "g5.xlarge"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_spot_price() -> f64 {
    0.75
}

fn default_target_utilization() -> f64 {
    70.0
}

fn default_scale_down_threshold() -> f64 {
    20.0
}

fn default_idle_timeout_minutes() -> u64 {
    30
}

fn default_cost_alert_threshold() -> f64 {
    50.0
}

fn default_budget_limit() -> f64 {
    200.0
}

fn default_true() -> bool {
    true
}

fn default_fallback_regions() -> Vec<String> {
    ["us-west-2", "eu-west-1", "ap-northeast-1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8600".to_string()
}

fn default_metadata_url() -> String {
    "http://169.254.169.254".to_string()
}

fn default_price_cache() -> PathBuf {
    PathBuf::from("/tmp/on_demand_prices_cache.json")
}

fn default_telemetry_snapshot() -> PathBuf {
    PathBuf::from("/shared/gpu_metrics.json")
}

fn default_scaling_history() -> PathBuf {
    PathBuf::from("/var/log/scaling-actions.jsonl")
}

fn default_scaling_history_fallback() -> PathBuf {
    PathBuf::from("/tmp/scaling-actions.jsonl")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_metadata_timeout() -> u64 {
    2
}

fn default_api_timeout() -> u64 {
    30
}

fn default_drain_step_timeout() -> u64 {
    30
}

fn default_auto_scaling_secs() -> u64 {
    15 * 60
}

fn default_pattern_scaling_secs() -> u64 {
    30 * 60
}

fn default_spot_pricing_secs() -> u64 {
    60 * 60
}

fn default_budget_check_secs() -> u64 {
    60 * 60
}

fn default_guardrail_secs() -> u64 {
    4 * 60 * 60
}

fn default_cleanup_secs() -> u64 {
    6 * 60 * 60
}

fn default_report_secs() -> u64 {
    24 * 60 * 60
}

fn default_preemption_poll_secs() -> u64 {
    30
}

fn default_profile_refresh_secs() -> u64 {
    6 * 60 * 60
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            metadata_url: default_metadata_url(),
            webhook_url: None,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            price_cache: default_price_cache(),
            telemetry_snapshot: default_telemetry_snapshot(),
            scaling_history: default_scaling_history(),
            scaling_history_fallback: default_scaling_history_fallback(),
            report_dir: default_report_dir(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            metadata_secs: default_metadata_timeout(),
            api_secs: default_api_timeout(),
            drain_step_secs: default_drain_step_timeout(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            auto_scaling_secs: default_auto_scaling_secs(),
            pattern_scaling_secs: default_pattern_scaling_secs(),
            spot_pricing_secs: default_spot_pricing_secs(),
            budget_check_secs: default_budget_check_secs(),
            guardrail_secs: default_guardrail_secs(),
            cleanup_secs: default_cleanup_secs(),
            report_secs: default_report_secs(),
            preemption_poll_secs: default_preemption_poll_secs(),
            profile_refresh_secs: default_profile_refresh_secs(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            instance_class: default_instance_class(),
            candidate_classes: default_candidate_classes(),
            fleet_id: None,
            max_spot_price: default_max_spot_price(),
            target_utilization: default_target_utilization(),
            scale_down_threshold: default_scale_down_threshold(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            cost_alert_threshold: default_cost_alert_threshold(),
            budget_limit: default_budget_limit(),
            enable_auto_cleanup: true,
            enable_cost_alerts: true,
            delete_expired_snapshots: false,
            fallback_regions: default_fallback_regions(),
            endpoints: EndpointConfig::default(),
            paths: PathConfig::default(),
            timeouts: TimeoutConfig::default(),
            schedule: ScheduleConfig::default(),
            workloads: WorkloadHooks::default(),
        }
    }
}

impl TimeoutConfig {
    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_secs)
    }

    pub fn api(&self) -> Duration {
        Duration::from_secs(self.api_secs)
    }

    pub fn drain_step(&self) -> Duration {
        Duration::from_secs(self.drain_step_secs)
    }
}

impl OptimizerConfig {
    /// Check every field, collecting all problems into one error
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.max_spot_price <= 0.0 || self.max_spot_price > 10.0 {
            errors.push("max_spot_price must be between 0 and 10".to_string());
        }
        if !(0.0..=100.0).contains(&self.target_utilization) {
            errors.push("target_utilization must be between 0 and 100".to_string());
        }
        if !(0.0..=100.0).contains(&self.scale_down_threshold) {
            errors.push("scale_down_threshold must be between 0 and 100".to_string());
        }
        if self.idle_timeout_minutes < 5 {
            errors.push("idle_timeout_minutes must be at least 5".to_string());
        }
        if self.cost_alert_threshold <= 0.0 {
            errors.push("cost_alert_threshold must be positive".to_string());
        }
        if self.budget_limit <= 0.0 {
            errors.push("budget_limit must be positive".to_string());
        }
        if !SUPPORTED_REGIONS.contains(&self.region.as_str()) {
            errors.push(format!(
                "region must be one of: {}",
                SUPPORTED_REGIONS.join(", ")
            ));
        }
        if self.instance_class.trim().is_empty() {
            errors.push("instance_class must not be empty".to_string());
        }
        if self.timeouts.metadata_secs == 0 || self.timeouts.metadata_secs > 9 {
            errors.push("timeouts.metadata_secs must be between 1 and 9".to_string());
        }
        if self.timeouts.api_secs == 0 || self.timeouts.drain_step_secs == 0 {
            errors.push("timeouts must be non-zero".to_string());
        }

        let s = &self.schedule;
        let cadences = [
            s.auto_scaling_secs,
            s.pattern_scaling_secs,
            s.spot_pricing_secs,
            s.budget_check_secs,
            s.guardrail_secs,
            s.cleanup_secs,
            s.report_secs,
            s.preemption_poll_secs,
            s.profile_refresh_secs,
        ];
        if cadences.iter().any(|c| *c == 0) {
            errors.push("schedule cadences must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { errors })
        }
    }

    /// Classes to price: candidates plus the configured class
    pub fn priced_classes(&self) -> Vec<String> {
        let mut classes = self.candidate_classes.clone();
        if !classes.contains(&self.instance_class) {
            classes.push(self.instance_class.clone());
        }
        classes
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }
}
