//! Scaling decisions and their execution

mod decision;
mod executor;
mod history;

pub use decision::{
    decide, reactive_decision, ScalingAction, ScalingDecision, ScalingPolicy,
    PROACTIVE_DOWN_CONFIRM, PROACTIVE_DOWN_PREDICTED, PROACTIVE_UP_PREDICTED, REACTIVE_DOWN,
    REACTIVE_UP,
};
pub use executor::{FleetScaler, ScalingOutcome};
pub use history::{ScalingHistoryLog, ScalingRecord};
