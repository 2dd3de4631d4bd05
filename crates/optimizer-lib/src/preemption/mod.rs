//! Spot reclamation handling

mod handler;


pub use handler::{
    DrainReport, DrainStep, PreemptionHandler, PreemptionState, DRAIN_WINDOW_FRACTION,
    MINIMUM_NOTICE,
};
