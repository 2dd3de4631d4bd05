//! Concrete collaborators: HTTP, process and filesystem implementations

mod files;
mod gateway;
mod imds;
mod webhook;
mod workload;

pub use files::DirectoryReportSink;
pub use gateway::GatewayClient;
pub use imds::InstanceMetadataClient;
pub use webhook::{LogNotifier, WebhookNotifier};
pub use workload::CommandWorkloads;

use crate::collaborators::NotificationSink;
use crate::config::OptimizerConfig;
use crate::context::Collaborators;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

impl Collaborators {
    /// Production collaborators for the configured endpoints
    pub fn from_config(config: &OptimizerConfig) -> Result<Self> {
        let timeouts = &config.timeouts;
        let gateway = Arc::new(GatewayClient::new(
            &config.endpoints.gateway_url,
            timeouts.api(),
        )?);
        let metadata = Arc::new(InstanceMetadataClient::new(
            &config.endpoints.metadata_url,
            timeouts.metadata(),
        )?);

        let notifier: Arc<dyn NotificationSink> = match &config.endpoints.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url, timeouts.api())?),
            None => {
                info!("No alert webhook configured, alerts will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self {
            market: gateway.clone(),
            metrics: gateway.clone(),
            fleet: gateway.clone(),
            storage: gateway,
            metadata,
            notifier,
            workloads: Arc::new(CommandWorkloads::new(config.workloads.clone())),
            reports: Arc::new(DirectoryReportSink::new(&config.paths.report_dir)),
        })
    }
}
