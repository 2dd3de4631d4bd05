//! Cost and capacity control for spot accelerator fleets
//!
//! This crate provides the core functionality for:
//! - Spot and reference price lookup with cache and fallback tables
//! - Accelerator utilization monitoring and usage-pattern prediction
//! - Predictive and reactive fleet scaling
//! - Monthly budget guardrails
//! - Reclamation notice handling and time-boxed draining
//! - The fault-isolating optimization cycle
//! - Health checks and observability

pub mod adapters;
pub mod advisory;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod predictor;
pub mod preemption;
pub mod pricing;
pub mod scaling;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::OptimizerConfig;
pub use context::{Collaborators, OptimizerContext};
pub use error::{CollaboratorError, ConfigError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use orchestrator::{CycleOrchestrator, CycleResult, CycleStatus};
