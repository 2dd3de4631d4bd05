//! Block storage cost advice for the volumes attached to this instance

use crate::collaborators::{bounded, StorageInventory};
use crate::models::VolumeInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Volumes larger than this are flagged for review
pub const LARGE_VOLUME_GIB: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageRecommendation {
    MigrateToGp3 { volume_id: String },
    ReviewSize { volume_id: String, size_gib: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageAdvice {
    pub volumes_checked: usize,
    pub recommendations: Vec<StorageRecommendation>,
    /// Set when the inventory could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

pub fn recommend(volumes: &[VolumeInfo]) -> Vec<StorageRecommendation> {
    let mut out = Vec::new();
    for volume in volumes {
        if volume.volume_type == "gp2" {
            out.push(StorageRecommendation::MigrateToGp3 {
                volume_id: volume.volume_id.clone(),
            });
        }
        if volume.size_gib > LARGE_VOLUME_GIB {
            out.push(StorageRecommendation::ReviewSize {
                volume_id: volume.volume_id.clone(),
                size_gib: volume.size_gib,
            });
        }
    }
    out
}

pub struct StorageAdvisor {
    inventory: Arc<dyn StorageInventory>,
    instance_id: String,
    timeout: Duration,
}

impl StorageAdvisor {
    pub fn new(
        inventory: Arc<dyn StorageInventory>,
        instance_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            instance_id: instance_id.into(),
            timeout,
        }
    }

    pub async fn advise(&self) -> StorageAdvice {
        let volumes = match bounded(
            "storage",
            self.timeout,
            self.inventory.attached_volumes(&self.instance_id),
        )
        .await
        {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(error = %e, "Error optimizing storage");
                return StorageAdvice {
                    unavailable: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let recommendations = recommend(&volumes);
        for rec in &recommendations {
            match rec {
                StorageRecommendation::MigrateToGp3 { volume_id } => info!(
                    volume_id = %volume_id,
                    "Consider migrating from gp2 to gp3 for cost savings"
                ),
                StorageRecommendation::ReviewSize { volume_id, size_gib } => info!(
                    volume_id = %volume_id,
                    size_gib = size_gib,
                    "Large volume, monitor usage and consider resize"
                ),
            }
        }

        StorageAdvice {
            volumes_checked: volumes.len(),
            recommendations,
            unavailable: None,
        }
    }
}
