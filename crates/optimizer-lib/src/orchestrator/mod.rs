//! Full optimization cycle and its report

mod cycle;
mod report;
mod steps;

pub use cycle::{
    CycleOrchestrator, CycleResult, CycleStatus, CycleStep, StepFn, StepFuture, StepOutcome,
};
pub use report::{CostReport, CostReportBuilder, LOW_UTILIZATION_PCT, NOTABLE_SAVINGS_PCT};
pub use steps::{
    standard_steps, AUTO_SCALING, COST_GUARDRAILS, COST_MONITORING, REPORT_GENERATION,
    RESOURCE_CLEANUP, SPOT_PRICING, STANDARD_STEPS, STORAGE_OPTIMIZATION, USAGE_PATTERN_SCALING,
};
