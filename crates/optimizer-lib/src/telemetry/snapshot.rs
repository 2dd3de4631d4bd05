//! Reader for the shared telemetry snapshot maintained by the node agent

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    gpu: Option<AcceleratorSection>,
}

/// Accelerator section of the snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct AcceleratorSection {
    #[serde(default)]
    pub utilization: f64,
    #[serde(default)]
    pub memory_utilization: f64,
    #[serde(default)]
    pub temperature_c: f64,
}

/// Small JSON file holding the agent's latest accelerator reading
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    path: PathBuf,
}

impl TelemetrySnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file or its accelerator section is absent
    pub async fn read(&self) -> Result<Option<AcceleratorSection>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read telemetry snapshot {:?}", self.path))
            }
        };

        let file: SnapshotFile =
            serde_json::from_slice(&data).context("Failed to parse telemetry snapshot")?;
        Ok(file.gpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_accelerator_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpu_metrics.json");
        std::fs::write(
            &path,
            r#"{"gpu":{"utilization":63.5,"memory_utilization":41.0,"temperature_c":67.0}}"#,
        )
        .unwrap();

        let section = TelemetrySnapshot::new(&path).read().await.unwrap().unwrap();
        assert_eq!(section.utilization, 63.5);
        assert_eq!(section.temperature_c, 67.0);
    }

    #[tokio::test]
    async fn test_missing_file_and_section() {
        let dir = TempDir::new().unwrap();
        let snapshot = TelemetrySnapshot::new(dir.path().join("absent.json"));
        assert!(snapshot.read().await.unwrap().is_none());

        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"cpu":{}}"#).unwrap();
        assert!(TelemetrySnapshot::new(&path).read().await.unwrap().is_none());
    }
}
