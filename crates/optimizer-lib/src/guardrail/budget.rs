//! Budget projection and tier classification

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PREVENTIVE_UTILIZATION_PCT: f64 = 80.0;
pub const EMERGENCY_UTILIZATION_PCT: f64 = 90.0;
/// Projected overage, as a fraction of the limit, that also triggers preventive measures
pub const PREVENTIVE_OVERAGE_FRACTION: f64 = 0.2;

/// Position within the current month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCalendar {
    pub days_in_month: u32,
    /// Day of month, counting today
    pub days_elapsed: u32,
}

impl BudgetCalendar {
    pub fn for_date(date: NaiveDate) -> Self {
        let (next_year, next_month) = if date.month() == 12 {
            (date.year() + 1, 1)
        } else {
            (date.year(), date.month() + 1)
        };
        let days_in_month = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|first_of_next| first_of_next.pred_opt())
            .map(|last| last.day())
            .unwrap_or(30);

        Self {
            days_in_month,
            days_elapsed: date.day(),
        }
    }

    pub fn days_remaining(&self) -> u32 {
        self.days_in_month.saturating_sub(self.days_elapsed)
    }
}

/// Linear spend projection for the current month
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub limit: f64,
    pub daily_estimate: f64,
    pub elapsed_estimate: f64,
    pub projected_estimate: f64,
    pub utilization_pct: f64,
    pub projected_overage: f64,
    pub days_remaining: u32,
    pub daily_budget_remaining: f64,
}

pub fn evaluate(daily_estimate: f64, limit: f64, calendar: BudgetCalendar) -> BudgetStatus {
    let daily_estimate = if daily_estimate.is_finite() {
        daily_estimate.max(0.0)
    } else {
        0.0
    };
    let projected = daily_estimate * f64::from(calendar.days_in_month);
    let elapsed = daily_estimate * f64::from(calendar.days_elapsed);
    let days_remaining = calendar.days_remaining();

    let utilization_pct = if limit > 0.0 {
        elapsed / limit * 100.0
    } else {
        0.0
    };

    BudgetStatus {
        limit,
        daily_estimate,
        elapsed_estimate: elapsed,
        projected_estimate: projected,
        utilization_pct,
        projected_overage: (projected - limit).max(0.0),
        days_remaining,
        daily_budget_remaining: (limit - elapsed) / f64::from(days_remaining.max(1)),
    }
}

/// Escalation level of budget risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailTier {
    Normal,
    Preventive,
    Emergency,
}

impl GuardrailTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailTier::Normal => "normal",
            GuardrailTier::Preventive => "preventive",
            GuardrailTier::Emergency => "emergency",
        }
    }

    /// Gauge value exported to metrics
    pub fn level(&self) -> i64 {
        match self {
            GuardrailTier::Normal => 0,
            GuardrailTier::Preventive => 1,
            GuardrailTier::Emergency => 2,
        }
    }
}

impl fmt::Display for GuardrailTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(status: &BudgetStatus) -> GuardrailTier {
    if status.utilization_pct >= EMERGENCY_UTILIZATION_PCT {
        GuardrailTier::Emergency
    } else if status.utilization_pct >= PREVENTIVE_UTILIZATION_PCT
        || status.projected_overage > status.limit * PREVENTIVE_OVERAGE_FRACTION
    {
        GuardrailTier::Preventive
    } else {
        GuardrailTier::Normal
    }
}
