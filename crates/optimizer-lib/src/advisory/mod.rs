//! Cost, storage and cleanup advisors

mod cleanup;
mod costs;
mod storage;

pub use cleanup::{
    expired_snapshots, CleanupReport, ResourceCleaner, UnattachedVolume, EMERGENCY_RETENTION,
    STANDARD_RETENTION,
};
pub use costs::{CostCheck, CostMonitor};
pub use storage::{
    recommend, StorageAdvice, StorageAdvisor, StorageRecommendation, LARGE_VOLUME_GIB,
};
