//! Spot GPU fleet cost optimizer
//!
//! Runs a single optimization cycle, prints a cost report, or stays
//! resident to run every operation on its own schedule while watching for
//! reclamation notices.

mod api;
mod config;
mod output;
mod schedule;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use optimizer_lib::context::{Collaborators, OptimizerContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const OPTIMIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cost and capacity control for spot GPU fleets
#[derive(Parser)]
#[command(name = "cost-optimizer")]
#[command(author, version, about = "Cost and capacity control for spot GPU fleets", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, short, env = "OPTIMIZER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum spot price in USD/hour
    #[arg(long)]
    pub max_spot_price: Option<f64>,

    /// Daily cost alert threshold in USD
    #[arg(long)]
    pub cost_threshold: Option<f64>,

    /// Monthly budget in USD
    #[arg(long)]
    pub budget_limit: Option<f64>,

    #[arg(long)]
    pub region: Option<String>,

    /// Instance class the fleet runs
    #[arg(long)]
    pub instance_type: Option<String>,

    /// Fleet whose capacity is managed
    #[arg(long)]
    pub fleet_id: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Port for the health and metrics server in resident modes
    #[arg(long, default_value_t = 8080)]
    pub api_port: u16,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
pub enum Commands {
    /// Run one full optimization cycle (default)
    Optimize,
    /// Print a cost report
    Report,
    /// Run every operation on its schedule until interrupted
    Schedule,
    /// Run one cycle now, then continue on the schedule
    Monitor,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Optimize => "optimize",
            Commands::Report => "report",
            Commands::Schedule => "schedule",
            Commands::Monitor => "monitor",
        }
    }
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            region: self.region.clone(),
            instance_class: self.instance_type.clone(),
            fleet_id: self.fleet_id.clone(),
            max_spot_price: self.max_spot_price,
            cost_threshold: self.cost_threshold,
            budget_limit: self.budget_limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr so command output stays clean on stdout
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Optimize);

    let config = config::load(cli.config.as_deref(), &cli.overrides())?;
    let collaborators =
        Collaborators::from_config(&config).context("Failed to set up collaborators")?;
    let ctx = OptimizerContext::build(config, collaborators).await?;
    ctx.logger().log_startup(OPTIMIZER_VERSION, command.name());

    match command {
        Commands::Optimize => {
            let result = ctx.orchestrator().run_cycle().await;
            output::print_cycle(&result, cli.format);
        }
        Commands::Report => {
            let report = ctx.generate_report().await;
            output::print_report(&report, cli.format);
        }
        Commands::Schedule => run_resident(ctx, cli.api_port, false, cli.format).await?,
        Commands::Monitor => run_resident(ctx, cli.api_port, true, cli.format).await?,
    }

    Ok(())
}

/// Serve health endpoints and run the scheduler until interrupted
async fn run_resident(
    ctx: Arc<OptimizerContext>,
    api_port: u16,
    cycle_first: bool,
    format: output::OutputFormat,
) -> Result<()> {
    let app_state = Arc::new(api::AppState::new(ctx.health.clone()));
    let api_handle = tokio::spawn(api::serve(api_port, app_state));
    ctx.health.set_ready(true).await;

    // Notice polling must be live before the first cycle starts
    let scheduler = schedule::Scheduler::start(ctx.clone());

    if cycle_first {
        info!("Starting continuous cost monitoring");
        let result = ctx.orchestrator().run_cycle().await;
        output::print_cycle(&result, format);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    ctx.logger().log_shutdown("SIGINT received");
    info!("Shutting down");

    ctx.health.set_ready(false).await;
    scheduler.shutdown().await;
    api_handle.abort();

    Ok(())
}
