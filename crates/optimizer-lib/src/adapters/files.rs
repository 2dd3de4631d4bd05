//! Report persistence on the local filesystem

use crate::collaborators::{async_trait, CollabResult, ReportSink};
use crate::error::CollaboratorError;
use crate::orchestrator::CostReport;
use std::path::{Path, PathBuf};

const SERVICE: &str = "report-sink";

/// Writes one report file per day into a directory
#[derive(Debug, Clone)]
pub struct DirectoryReportSink {
    dir: PathBuf,
}

impl DirectoryReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &CostReport) -> PathBuf {
        self.dir.join(format!(
            "cost-optimization-report-{}.json",
            report.timestamp.format("%Y-%m-%d")
        ))
    }
}

#[async_trait]
impl ReportSink for DirectoryReportSink {
    async fn persist(&self, report: &CostReport) -> CollabResult<String> {
        let path = self.path_for(report);
        let data = serde_json::to_vec_pretty(report)
            .map_err(|e| CollaboratorError::decode(SERVICE, e))?;

        write_atomic(&path, &data)
            .await
            .map_err(|e| CollaboratorError::unavailable(SERVICE, format!("{:?}: {}", path, e)))?;

        Ok(path.display().to_string())
    }
}

/// Temp file plus rename, so readers never see a partial report
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, data).await?;
    tokio::fs::rename(&temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CostReportBuilder;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_report_written_under_dated_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectoryReportSink::new(dir.path().join("reports"));
        let report = CostReportBuilder::new("i-self")
            .timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())
            .daily_cost(12.0, 50.0)
            .build();

        let location = sink.persist(&report).await.unwrap();

        assert!(location.ends_with("cost-optimization-report-2024-05-01.json"));
        let stored: CostReport =
            serde_json::from_slice(&std::fs::read(&location).unwrap()).unwrap();
        assert_eq!(stored, report);
        assert!(!dir.path().join("reports/cost-optimization-report-2024-05-01.tmp").exists());
    }

    #[tokio::test]
    async fn test_same_day_report_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectoryReportSink::new(dir.path());
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        sink.persist(&CostReportBuilder::new("i-self").timestamp(at).daily_cost(1.0, 50.0).build())
            .await
            .unwrap();
        let location = sink
            .persist(&CostReportBuilder::new("i-self").timestamp(at).daily_cost(2.0, 50.0).build())
            .await
            .unwrap();

        let stored: CostReport =
            serde_json::from_slice(&std::fs::read(&location).unwrap()).unwrap();
        assert_eq!(stored.estimated_daily_cost, 2.0);
    }
}
