//! Daily batch commands (detection, insights, risk) and the scheduler loop

use anyhow::Context;
use clap::Subcommand;
use nutrimind_core::jobs::{default_scheduler, JobReport};
use nutrimind_core::PipelineConfig;
use std::sync::Arc;
use tracing::info;

use super::helpers::open_pipeline;

#[derive(Subcommand)]
pub enum JobCommand {
    /// Run pattern detection for every user
    Detection {
        /// Max users to process
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Generate today's insight for every user
    Insights {
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Recompute today's risk for every user
    Risk {
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Run detection, risk and insights in that order
    All {
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Run the scheduler until interrupted
    Scheduler,
}

impl JobCommand {
    fn batch_size(&self) -> Option<usize> {
        match self {
            JobCommand::Detection { batch_size }
            | JobCommand::Insights { batch_size }
            | JobCommand::Risk { batch_size }
            | JobCommand::All { batch_size } => *batch_size,
            JobCommand::Scheduler => None,
        }
    }

    fn job_names(&self) -> &'static [&'static str] {
        match self {
            JobCommand::Detection { .. } => &["daily_detection"],
            JobCommand::Insights { .. } => &["daily_insights"],
            JobCommand::Risk { .. } => &["daily_risk"],
            JobCommand::All { .. } => &["daily_detection", "daily_risk", "daily_insights"],
            JobCommand::Scheduler => &[],
        }
    }
}

fn print_report(name: &str, report: &JobReport) {
    println!(" {} complete:", name);
    println!("  Users processed: {}", report.users_processed);
    println!("  Changes made: {}", report.changes_made);
    println!("  Errors: {}", report.errors);
    if let Some(message) = &report.error_message {
        println!("  Error detail: {}", message);
    }
    println!("  Duration: {:?}", report.duration);
}

/// Handle the jobs command
pub async fn handle(command: JobCommand, mut config: PipelineConfig) -> anyhow::Result<()> {
    if let Some(batch_size) = command.batch_size() {
        config.jobs.detection.batch_size = batch_size;
        config.jobs.insights.batch_size = batch_size;
        config.jobs.risk.batch_size = batch_size;
    }

    let pipeline = open_pipeline(config).await?;
    let scheduler = Arc::new(default_scheduler(pipeline));

    if let JobCommand::Scheduler = command {
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        info!("Scheduler running with jobs: {}", scheduler.job_names().join(", "));
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown requested");
        scheduler.stop();
        handle.await.context("Scheduler task panicked")??;
        return Ok(());
    }

    let mut failed = false;
    for name in command.job_names() {
        println!("Running {}...", name);
        match scheduler.run_named(name).await {
            Ok(report) => {
                failed |= report.error_message.is_some();
                print_report(name, &report);
            }
            Err(e) => {
                eprintln!(" {} failed: {}", name, e);
                failed = true;
            }
        }
        println!();
    }

    if failed {
        anyhow::bail!("one or more jobs reported errors");
    }
    Ok(())
}
