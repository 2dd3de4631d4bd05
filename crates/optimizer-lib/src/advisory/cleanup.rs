//! Retention-based cleanup of snapshots and discovery of orphaned volumes

use crate::collaborators::{bounded, StorageInventory};
use crate::models::SnapshotInfo;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const STANDARD_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const EMERGENCY_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnattachedVolume {
    pub volume_id: String,
    pub size_gib: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub retention_days: f64,
    pub expired_snapshots: Vec<String>,
    pub unattached_volumes: Vec<UnattachedVolume>,
    pub deleted_snapshots: Vec<String>,
}

impl CleanupReport {
    /// Number of resources found or removed
    pub fn candidates(&self) -> usize {
        self.expired_snapshots.len() + self.unattached_volumes.len()
    }
}

/// Snapshots started before `now - retention`
pub fn expired_snapshots(
    snapshots: &[SnapshotInfo],
    retention: Duration,
    now: DateTime<Utc>,
) -> Vec<String> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let Some(cutoff) = now.checked_sub_signed(retention) else {
        return Vec::new();
    };
    snapshots
        .iter()
        .filter(|s| s.started_at < cutoff)
        .map(|s| s.snapshot_id.clone())
        .collect()
}

pub struct ResourceCleaner {
    inventory: Arc<dyn StorageInventory>,
    timeout: Duration,
    delete_expired: bool,
}

impl ResourceCleaner {
    pub fn new(inventory: Arc<dyn StorageInventory>, timeout: Duration, delete_expired: bool) -> Self {
        Self {
            inventory,
            timeout,
            delete_expired,
        }
    }

    /// Report cleanup candidates, deleting expired snapshots when enabled.
    ///
    /// Listing failures are tolerated; a failed deletion is returned as an
    /// error after every deletion was attempted.
    pub async fn cleanup(&self, retention: Duration) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            retention_days: retention.as_secs_f64() / 86_400.0,
            ..Default::default()
        };

        match bounded("storage", self.timeout, self.inventory.snapshots()).await {
            Ok(snapshots) => {
                report.expired_snapshots = expired_snapshots(&snapshots, retention, Utc::now());
                for id in &report.expired_snapshots {
                    info!(snapshot_id = %id, "Old snapshot found");
                }
            }
            Err(e) => warn!(error = %e, "Could not list snapshots"),
        }

        match bounded("storage", self.timeout, self.inventory.unattached_volumes()).await {
            Ok(volumes) => {
                for volume in volumes {
                    info!(
                        volume_id = %volume.volume_id,
                        size_gib = volume.size_gib,
                        "Unattached volume found"
                    );
                    report.unattached_volumes.push(UnattachedVolume {
                        volume_id: volume.volume_id,
                        size_gib: volume.size_gib,
                    });
                }
            }
            Err(e) => warn!(error = %e, "Could not list unattached volumes"),
        }

        if !self.delete_expired {
            return Ok(report);
        }

        let mut failed = Vec::new();
        for id in &report.expired_snapshots {
            match bounded("storage", self.timeout, self.inventory.delete_snapshot(id)).await {
                Ok(()) => {
                    info!(snapshot_id = %id, "Deleted expired snapshot");
                    report.deleted_snapshots.push(id.clone());
                }
                Err(e) => {
                    warn!(snapshot_id = %id, error = %e, "Failed to delete snapshot");
                    failed.push(id.clone());
                }
            }
        }

        if !failed.is_empty() {
            bail!("Failed to delete snapshots: {}", failed.join(", "));
        }
        Ok(report)
    }
}
