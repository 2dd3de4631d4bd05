//! Pure scaling decisions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Predicted utilization above which capacity is added ahead of demand
pub const PROACTIVE_UP_PREDICTED: f64 = 80.0;
/// Predicted utilization below which capacity may be removed
pub const PROACTIVE_DOWN_PREDICTED: f64 = 30.0;
/// Current utilization that must corroborate a proactive scale-down
pub const PROACTIVE_DOWN_CONFIRM: f64 = 40.0;
pub const REACTIVE_UP: f64 = 85.0;
pub const REACTIVE_DOWN: f64 = 20.0;

/// Which rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUpProactive,
    ScaleDownProactive,
    ScaleUpReactive,
    ScaleDownReactive,
    NoChange,
}

impl ScalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingAction::ScaleUpProactive => "scale_up_proactive",
            ScalingAction::ScaleDownProactive => "scale_down_proactive",
            ScalingAction::ScaleUpReactive => "scale_up_reactive",
            ScalingAction::ScaleDownReactive => "scale_down_reactive",
            ScalingAction::NoChange => "no_change",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub target_capacity: u32,
    pub action: ScalingAction,
    pub reasoning: String,
}

/// Fuse current and predicted utilization into one target capacity.
///
/// The target is always inside `[min, max]` and, when `current` already is,
/// at most one step away from it. An inverted range yields no change.
pub fn decide(
    current: u32,
    min: u32,
    max: u32,
    current_util: f64,
    predicted_util: f64,
) -> ScalingDecision {
    let mut reasoning = format!(
        "Current: {:.1}%, Predicted: {:.1}%",
        current_util, predicted_util
    );

    if min > max {
        reasoning.push_str(" - Invalid capacity range, no change");
        return ScalingDecision {
            target_capacity: current,
            action: ScalingAction::NoChange,
            reasoning,
        };
    }

    let (action, note) = if predicted_util > PROACTIVE_UP_PREDICTED && current < max {
        (
            ScalingAction::ScaleUpProactive,
            "Proactive scale up for predicted high demand",
        )
    } else if predicted_util < PROACTIVE_DOWN_PREDICTED
        && current_util < PROACTIVE_DOWN_CONFIRM
        && current > min
    {
        (
            ScalingAction::ScaleDownProactive,
            "Proactive scale down for predicted low demand",
        )
    } else if current_util > REACTIVE_UP && current < max {
        (
            ScalingAction::ScaleUpReactive,
            "Reactive scale up for high current utilization",
        )
    } else if current_util < REACTIVE_DOWN && current > min {
        (
            ScalingAction::ScaleDownReactive,
            "Reactive scale down for low current utilization",
        )
    } else {
        (ScalingAction::NoChange, "")
    };

    if !note.is_empty() {
        reasoning.push_str(" - ");
        reasoning.push_str(note);
    }

    ScalingDecision {
        target_capacity: step_target(current, min, max, action),
        action,
        reasoning,
    }
}

fn step_target(current: u32, min: u32, max: u32, action: ScalingAction) -> u32 {
    let stepped = match action {
        ScalingAction::ScaleUpProactive | ScalingAction::ScaleUpReactive => {
            current.saturating_add(1)
        }
        ScalingAction::ScaleDownProactive | ScalingAction::ScaleDownReactive => {
            current.saturating_sub(1)
        }
        ScalingAction::NoChange => current,
    };
    stepped.clamp(min, max)
}

/// Thresholds for the coarse reactive auto-scale check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub target_utilization: f64,
    pub scale_down_threshold: f64,
}

impl ScalingPolicy {
    pub fn new(target_utilization: f64, scale_down_threshold: f64) -> Self {
        Self {
            target_utilization,
            scale_down_threshold,
        }
    }

    /// Stricter copy used for a single preventive pass
    pub fn tightened(&self) -> Self {
        Self {
            target_utilization: self.target_utilization.min(60.0),
            scale_down_threshold: self.scale_down_threshold.max(30.0),
        }
    }
}

/// Coarse reactive rule: scale up above target, down below the threshold
/// only when an idle instance corroborates it.
pub fn reactive_decision(
    policy: &ScalingPolicy,
    current: u32,
    min: u32,
    max: u32,
    current_util: f64,
    idle_instances: usize,
) -> ScalingDecision {
    let reasoning = format!(
        "Utilization {:.1}% (target {:.1}%, scale-down below {:.1}%)",
        current_util, policy.target_utilization, policy.scale_down_threshold
    );

    let action = if min > max {
        ScalingAction::NoChange
    } else if current_util > policy.target_utilization && current < max {
        ScalingAction::ScaleUpReactive
    } else if current_util < policy.scale_down_threshold && current > min && idle_instances > 0 {
        ScalingAction::ScaleDownReactive
    } else {
        ScalingAction::NoChange
    };

    let target_capacity = if min > max {
        current
    } else {
        step_target(current, min, max, action)
    };

    ScalingDecision {
        target_capacity,
        action,
        reasoning,
    }
}
