//! Append-only JSON lines log of applied scaling changes

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One applied capacity change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRecord {
    pub timestamp: DateTime<Utc>,
    pub hour: u32,
    pub day_of_week: u32,
    pub utilization: f64,
    pub scale_change: i64,
    pub instance_id: String,
}

impl ScalingRecord {
    pub fn new(at: DateTime<Utc>, utilization: f64, scale_change: i64, instance_id: &str) -> Self {
        Self {
            timestamp: at,
            hour: at.hour(),
            day_of_week: at.weekday().num_days_from_monday(),
            utilization,
            scale_change,
            instance_id: instance_id.to_string(),
        }
    }
}

/// Serialized appender; concurrent callers never interleave lines
#[derive(Debug)]
pub struct ScalingHistoryLog {
    primary: PathBuf,
    fallback: PathBuf,
    lock: Mutex<()>,
}

impl ScalingHistoryLog {
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
            lock: Mutex::new(()),
        }
    }

    /// Append a record, trying the fallback path when the primary is not writable.
    /// Returns the path written to.
    pub async fn append(&self, record: &ScalingRecord) -> Result<PathBuf> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize scaling record")?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;

        match append_line(&self.primary, &line).await {
            Ok(()) => Ok(self.primary.clone()),
            Err(e) => {
                warn!(
                    path = %self.primary.display(),
                    error = %e,
                    "Scaling history not writable, using fallback"
                );
                append_line(&self.fallback, &line).await?;
                Ok(self.fallback.clone())
            }
        }
    }

    /// All records from the primary and fallback logs; unreadable lines are skipped
    pub async fn read_all(&self) -> Vec<ScalingRecord> {
        let _guard = self.lock.lock().await;
        let mut records = Vec::new();
        for path in [&self.primary, &self.fallback] {
            if let Ok(data) = tokio::fs::read_to_string(path).await {
                records.extend(data.lines().filter_map(|l| serde_json::from_str(l).ok()));
            }
        }
        records.sort_by_key(|r: &ScalingRecord| r.timestamp);
        records
    }
}

async fn append_line(path: &Path, line: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {:?}", path))?;

    file.write_all(line)
        .await
        .with_context(|| format!("Failed to append to {:?}", path))?;
    file.flush().await?;

    debug!(path = %path.display(), "Scaling record appended");
    Ok(())
}
