//! Terminal output for cycle results and cost reports

use clap::ValueEnum;
use colored::Colorize;
use optimizer_lib::orchestrator::{CostReport, CycleResult, CycleStatus};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Error")]
    error: String,
}

#[derive(Tabled)]
struct SavingsRow {
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Spot $/h")]
    spot: String,
    #[tabled(rename = "On-demand $/h")]
    reference: String,
    #[tabled(rename = "Savings")]
    savings: String,
    #[tabled(rename = "Monthly")]
    monthly: String,
}

pub fn print_cycle(result: &CycleResult, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Table => {
            let rows: Vec<StepRow> = result
                .steps
                .iter()
                .map(|s| StepRow {
                    step: s.step.clone(),
                    status: if s.success {
                        "ok".green().to_string()
                    } else {
                        "failed".red().to_string()
                    },
                    duration: format!("{:.2}s", s.duration_secs),
                    error: s.error.clone().unwrap_or_default(),
                })
                .collect();

            if !rows.is_empty() {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }

            let summary = format!(
                "Cycle {} in {:.1}s ({}/{} steps succeeded)",
                result.status.as_str(),
                result.duration_secs,
                result.succeeded(),
                result.steps.len()
            );
            match result.status {
                CycleStatus::Completed => print_success(&summary),
                CycleStatus::Partial => print_warning(&summary),
                CycleStatus::Aborted => {
                    print_warning(&summary);
                    if let Some(drain) = &result.preemption {
                        print_info(&format!(
                            "Reclamation notice handled: {} drain steps, {} failed, {:.1}s",
                            drain.steps.len(),
                            drain.failed_steps(),
                            drain.elapsed_secs
                        ));
                    }
                }
            }
        }
    }
}

pub fn print_report(report: &CostReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            println!("{}", "Cost Optimization Report".bold());
            println!("Instance:              {}", report.instance_id);
            println!(
                "Accelerator utilization: {:.1}%",
                report.current_accelerator_utilization
            );
            println!("Estimated daily cost:  ${:.2}", report.estimated_daily_cost);
            if let Some(budget) = &report.budget_status {
                println!(
                    "Budget used:           {:.1}% of ${:.2} (projected ${:.2})",
                    budget.utilization_pct, budget.limit, budget.projected_estimate
                );
            }

            let rows: Vec<SavingsRow> = report
                .savings_analysis
                .iter()
                .map(|(class, s)| SavingsRow {
                    class: class.clone(),
                    spot: format!("{:.4}", s.spot_price),
                    reference: format!("{:.4}", s.reference_price),
                    savings: format!("{:.1}%", s.savings_percentage),
                    monthly: format!("${:.2}", s.monthly_savings),
                })
                .collect();
            if rows.is_empty() {
                print_warning("No spot prices available");
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }

            for recommendation in &report.recommendations {
                print_info(recommendation);
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize output: {}", e)),
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}
