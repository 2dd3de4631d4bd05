//! Monthly budget guardrail

mod actions;
mod budget;

pub use actions::{ActionResult, BudgetGuardrail, GuardrailReport};
pub use budget::{
    classify, evaluate, BudgetCalendar, BudgetStatus, GuardrailTier, EMERGENCY_UTILIZATION_PCT,
    PREVENTIVE_OVERAGE_FRACTION, PREVENTIVE_UTILIZATION_PCT,
};
