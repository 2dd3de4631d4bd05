//! Cost report assembled at the end of a cycle

use crate::guardrail::BudgetStatus;
use crate::models::{SystemUtilization, UtilizationReading};
use crate::pricing::{PriceOrigin, SavingsAnalysis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Utilization below which the report suggests scaling down
pub const LOW_UTILIZATION_PCT: f64 = 30.0;
/// Savings above which the report suggests the cheapest spot class
pub const NOTABLE_SAVINGS_PCT: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub timestamp: DateTime<Utc>,
    pub instance_id: String,
    pub current_accelerator_utilization: f64,
    pub estimated_daily_cost: f64,
    pub budget_status: Option<BudgetStatus>,
    pub spot_prices: BTreeMap<String, f64>,
    pub reference_price_origin: Option<PriceOrigin>,
    pub savings_analysis: BTreeMap<String, SavingsAnalysis>,
    pub system_metrics: SystemUtilization,
    pub accelerator_metrics: UtilizationReading,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CostReportBuilder {
    instance_id: String,
    timestamp: Option<DateTime<Utc>>,
    accelerator: UtilizationReading,
    system: SystemUtilization,
    daily_cost: f64,
    cost_threshold: f64,
    budget: Option<BudgetStatus>,
    spot_prices: BTreeMap<String, f64>,
    reference_origin: Option<PriceOrigin>,
    savings: BTreeMap<String, SavingsAnalysis>,
}

impl CostReportBuilder {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn accelerator(mut self, reading: UtilizationReading) -> Self {
        self.accelerator = reading;
        self
    }

    pub fn system(mut self, system: SystemUtilization) -> Self {
        self.system = system;
        self
    }

    pub fn daily_cost(mut self, daily_cost: f64, threshold: f64) -> Self {
        self.daily_cost = daily_cost;
        self.cost_threshold = threshold;
        self
    }

    pub fn budget(mut self, status: BudgetStatus) -> Self {
        self.budget = Some(status);
        self
    }

    pub fn spot_prices(mut self, prices: BTreeMap<String, f64>) -> Self {
        self.spot_prices = prices;
        self
    }

    pub fn savings(
        mut self,
        savings: BTreeMap<String, SavingsAnalysis>,
        origin: PriceOrigin,
    ) -> Self {
        self.savings = savings;
        self.reference_origin = Some(origin);
        self
    }

    pub fn build(self) -> CostReport {
        let mut recommendations = Vec::new();

        if self.accelerator.accelerator < LOW_UTILIZATION_PCT {
            recommendations.push(
                "Low accelerator utilization detected - consider scaling down or optimizing workloads"
                    .to_string(),
            );
        }

        if self.daily_cost > self.cost_threshold {
            recommendations.push(format!(
                "Daily cost ${:.2} exceeds threshold - review resource usage",
                self.daily_cost
            ));
        }

        // Cheapest spot class, if its savings are notable
        let cheapest = self.savings.iter().fold(
            None,
            |best: Option<(&String, &SavingsAnalysis)>, candidate| match best {
                Some(current) if current.1.spot_price <= candidate.1.spot_price => Some(current),
                _ => Some(candidate),
            },
        );
        if let Some((class, analysis)) = cheapest {
            if analysis.savings_percentage > NOTABLE_SAVINGS_PCT {
                recommendations.push(format!(
                    "Consider {} for {:.1}% cost savings",
                    class, analysis.savings_percentage
                ));
            }
        }

        CostReport {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            instance_id: self.instance_id,
            current_accelerator_utilization: self.accelerator.accelerator,
            estimated_daily_cost: self.daily_cost,
            budget_status: self.budget,
            spot_prices: self.spot_prices,
            reference_price_origin: self.reference_origin,
            savings_analysis: self.savings,
            system_metrics: self.system,
            accelerator_metrics: self.accelerator,
            recommendations,
        }
    }
}
