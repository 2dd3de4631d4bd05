//! Usage pattern learning and short-horizon demand prediction

mod profile;

pub use profile::{build_profile, predict, UsageProfile, NEUTRAL_UTILIZATION};

use crate::telemetry::{UtilizationMonitor, HISTORY_WINDOW};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct ProfileSlot {
    profile: Arc<UsageProfile>,
    built_at: Option<DateTime<Utc>>,
}

/// Holds the latest usage profile of this instance.
///
/// Profiles are rebuilt from history and swapped in whole; readers keep
/// whichever profile they already cloned.
pub struct UsagePatternPredictor {
    monitor: Arc<UtilizationMonitor>,
    slot: RwLock<ProfileSlot>,
}

impl UsagePatternPredictor {
    pub fn new(monitor: Arc<UtilizationMonitor>) -> Self {
        Self {
            monitor,
            slot: RwLock::new(ProfileSlot {
                profile: Arc::new(UsageProfile::default()),
                built_at: None,
            }),
        }
    }

    /// Latest profile; neutral until the first refresh
    pub fn profile(&self) -> Arc<UsageProfile> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profile
            .clone()
    }

    /// Rebuild from the trailing history window and replace the current profile
    pub async fn refresh(&self) -> Arc<UsageProfile> {
        let samples = self
            .monitor
            .historical_utilization(self.monitor.instance_id(), HISTORY_WINDOW)
            .await;
        let profile = Arc::new(build_profile(&samples));

        info!(samples = profile.sample_count, "Usage profile rebuilt");

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = ProfileSlot {
            profile: profile.clone(),
            built_at: Some(Utc::now()),
        };
        profile
    }

    /// Profile no older than `max_age`, refreshing if needed
    pub async fn current_profile(&self, max_age: Duration) -> Arc<UsageProfile> {
        let built_at = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .built_at;

        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        match built_at {
            Some(at) if Utc::now().signed_duration_since(at) < max_age => self.profile(),
            _ => self.refresh().await,
        }
    }

    /// Prediction for the hour and weekday of `at`
    pub fn predict_at(profile: &UsageProfile, at: DateTime<Utc>) -> f64 {
        predict(profile, at.hour(), at.weekday().num_days_from_monday())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{async_trait, CollabResult, MetricQuery, MetricsService};
    use crate::models::Datapoint;
    use crate::telemetry::TelemetrySnapshot;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMetrics {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricsService for CountingMetrics {
        async fn statistics(&self, _query: &MetricQuery) -> CollabResult<Vec<Datapoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Datapoint {
                timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap(),
                average: 90.0,
            }])
        }
    }

    fn predictor() -> (UsagePatternPredictor, Arc<CountingMetrics>) {
        let metrics = Arc::new(CountingMetrics {
            calls: AtomicUsize::new(0),
        });
        let monitor = UtilizationMonitor::new(
            metrics.clone(),
            TelemetrySnapshot::new("/nonexistent/gpu_metrics.json"),
            "i-self",
            Duration::from_secs(5),
        );
        (UsagePatternPredictor::new(Arc::new(monitor)), metrics)
    }

    #[tokio::test]
    async fn test_refresh_replaces_profile() {
        let (predictor, _) = predictor();
        let before = predictor.profile();
        assert_eq!(before.sample_count, 0);

        predictor.refresh().await;
        let after = predictor.profile();

        assert_eq!(after.sample_count, 1);
        assert_eq!(after.hourly[10], 90.0);
        // A reader holding the old profile is unaffected
        assert_eq!(before.hourly[10], 50.0);
    }

    #[tokio::test]
    async fn test_current_profile_reuses_fresh_profile() {
        let (predictor, metrics) = predictor();

        predictor.current_profile(Duration::from_secs(3600)).await;
        predictor.current_profile(Duration::from_secs(3600)).await;
        assert_eq!(metrics.calls.load(Ordering::SeqCst), 1);

        predictor.current_profile(Duration::ZERO).await;
        assert_eq!(metrics.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_predict_at_uses_utc_slot() {
        let profile = UsageProfile::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 8, 3, 30, 0).unwrap();
        assert!((UsagePatternPredictor::predict_at(&profile, at) - 40.0).abs() < 1e-9);
    }
}
