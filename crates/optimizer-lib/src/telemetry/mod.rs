//! Utilization telemetry

mod monitor;
mod snapshot;

pub use monitor::{
    UtilizationMonitor, ACCELERATOR_METRIC, ACCELERATOR_NAMESPACE, CURRENT_PERIOD, CURRENT_WINDOW,
    HISTORY_PERIOD, HISTORY_WINDOW,
};
pub use snapshot::{AcceleratorSection, TelemetrySnapshot};
