//! The standard optimization steps, in cycle order

use super::cycle::CycleStep;
use crate::context::OptimizerContext;
use anyhow::Context;
use serde_json::json;
use std::sync::Arc;

pub const SPOT_PRICING: &str = "spot_pricing";
pub const AUTO_SCALING: &str = "auto_scaling";
pub const STORAGE_OPTIMIZATION: &str = "storage_optimization";
pub const COST_MONITORING: &str = "cost_monitoring";
pub const COST_GUARDRAILS: &str = "cost_guardrails";
pub const USAGE_PATTERN_SCALING: &str = "usage_pattern_scaling";
pub const RESOURCE_CLEANUP: &str = "resource_cleanup";
pub const REPORT_GENERATION: &str = "report_generation";

pub const STANDARD_STEPS: [&str; 8] = [
    SPOT_PRICING,
    AUTO_SCALING,
    STORAGE_OPTIMIZATION,
    COST_MONITORING,
    COST_GUARDRAILS,
    USAGE_PATTERN_SCALING,
    RESOURCE_CLEANUP,
    REPORT_GENERATION,
];

fn to_value<T: serde::Serialize>(value: &T) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(value).context("Failed to serialize step output")
}

pub fn standard_steps(ctx: Arc<OptimizerContext>) -> Vec<CycleStep> {
    let mut steps = Vec::with_capacity(STANDARD_STEPS.len());

    let c = ctx.clone();
    steps.push(CycleStep::new(SPOT_PRICING, move || {
        let c = c.clone();
        async move { to_value(&c.optimize_spot_pricing().await) }
    }));

    let c = ctx.clone();
    steps.push(CycleStep::new(AUTO_SCALING, move || {
        let c = c.clone();
        async move { to_value(&c.auto_scale().await?) }
    }));

    let c = ctx.clone();
    steps.push(CycleStep::new(STORAGE_OPTIMIZATION, move || {
        let c = c.clone();
        async move { to_value(&c.storage_advice().await) }
    }));

    let c = ctx.clone();
    steps.push(CycleStep::new(COST_MONITORING, move || {
        let c = c.clone();
        async move { to_value(&c.monitor_costs().await) }
    }));

    let c = ctx.clone();
    steps.push(CycleStep::new(COST_GUARDRAILS, move || {
        let c = c.clone();
        async move { to_value(&c.run_guardrail().await) }
    }));

    let c = ctx.clone();
    steps.push(CycleStep::new(USAGE_PATTERN_SCALING, move || {
        let c = c.clone();
        async move { to_value(&c.pattern_scale().await?) }
    }));

    let c = ctx.clone();
    steps.push(CycleStep::new(RESOURCE_CLEANUP, move || {
        let c = c.clone();
        async move { to_value(&c.cleanup().await?) }
    }));

    let c = ctx;
    steps.push(CycleStep::new(REPORT_GENERATION, move || {
        let c = c.clone();
        async move {
            let (report, location) = c.generate_and_save_report().await?;
            Ok(json!({
                "location": location,
                "recommendations": report.recommendations,
            }))
        }
    }));

    steps
}
