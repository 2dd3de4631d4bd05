//! Hour-of-day and weekday utilization profile

use crate::models::{clamp_percent, UtilizationSample};
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

/// Utilization assumed for a time slot with no history
pub const NEUTRAL_UTILIZATION: f64 = 50.0;

const HOURLY_WEIGHT: f64 = 0.7;
const DAILY_WEIGHT: f64 = 0.3;

const BUSINESS_HOURS_FACTOR: f64 = 1.2;
const LATE_NIGHT_FACTOR: f64 = 0.8;
const WEEKEND_FACTOR: f64 = 0.9;

/// Mean utilization per hour (0-23, UTC) and per weekday (0 = Monday)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageProfile {
    pub hourly: [f64; 24],
    pub daily: [f64; 7],
    pub sample_count: usize,
}

impl Default for UsageProfile {
    fn default() -> Self {
        Self {
            hourly: [NEUTRAL_UTILIZATION; 24],
            daily: [NEUTRAL_UTILIZATION; 7],
            sample_count: 0,
        }
    }
}

/// Average samples into hour and weekday buckets. Empty buckets are neutral.
pub fn build_profile(samples: &[UtilizationSample]) -> UsageProfile {
    let mut hourly = [(0.0_f64, 0_usize); 24];
    let mut daily = [(0.0_f64, 0_usize); 7];
    let mut count = 0;

    for sample in samples {
        if !sample.value.is_finite() {
            continue;
        }
        let hour = sample.timestamp.hour() as usize;
        let weekday = sample.timestamp.weekday().num_days_from_monday() as usize;

        hourly[hour].0 += sample.value;
        hourly[hour].1 += 1;
        daily[weekday].0 += sample.value;
        daily[weekday].1 += 1;
        count += 1;
    }

    let mean = |(sum, n): (f64, usize)| {
        if n == 0 {
            NEUTRAL_UTILIZATION
        } else {
            sum / n as f64
        }
    };

    UsageProfile {
        hourly: hourly.map(mean),
        daily: daily.map(mean),
        sample_count: count,
    }
}

/// Predicted utilization for an hour (0-23) and weekday (0 = Monday)
pub fn predict(profile: &UsageProfile, hour: u32, weekday: u32) -> f64 {
    let hourly = profile
        .hourly
        .get(hour as usize)
        .copied()
        .unwrap_or(NEUTRAL_UTILIZATION);
    let daily = profile
        .daily
        .get(weekday as usize)
        .copied()
        .unwrap_or(NEUTRAL_UTILIZATION);

    let blended = HOURLY_WEIGHT * hourly + DAILY_WEIGHT * daily;

    // First matching adjustment only
    let factor = if (9..=17).contains(&hour) && weekday < 5 {
        BUSINESS_HOURS_FACTOR
    } else if hour < 6 || hour > 22 {
        LATE_NIGHT_FACTOR
    } else if weekday >= 5 {
        WEEKEND_FACTOR
    } else {
        1.0
    };

    clamp_percent(blended * factor)
}
