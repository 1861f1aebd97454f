//! openorders CLI - Scheduled Open Orders Report
//!
//! Builds the open orders workbook per sales segment at fixed times of day
//! and mails it to each segment's distribution list.

mod pipeline;
mod scheduler;
mod sink;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use openorders_core::{ReportConfig, RunContext, TriggerConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::pipeline::{Pipeline, PipelineHalt};
use crate::scheduler::{Scheduler, SystemClock};

#[derive(Parser)]
#[command(name = "openorders")]
#[command(author, version, about = "Scheduled open orders report", long_about = None)]
struct Cli {
    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until the terminal trigger has fired
    Run {
        /// Configuration file
        #[arg(short, long, value_name = "FILE", env = "OPENORDERS_CONFIG")]
        config: PathBuf,
    },

    /// Run one trigger immediately
    Once {
        /// Configuration file
        #[arg(short, long, value_name = "FILE", env = "OPENORDERS_CONFIG")]
        config: PathBuf,

        /// Trigger label (e.g. "morning")
        #[arg(short, long)]
        trigger: String,

        /// Run as of this date at the trigger's time instead of now
        #[arg(long, value_name = "YYYY-MM-DD")]
        as_of: Option<NaiveDate>,
    },

    /// Validate a configuration file and show the resolved schedule
    Check {
        /// Configuration file
        #[arg(short, long, value_name = "FILE", env = "OPENORDERS_CONFIG")]
        config: PathBuf,

        /// Print the parsed configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over -v
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Once {
            config,
            trigger,
            as_of,
        } => cmd_once(&config, &trigger, as_of),
        Commands::Check { config, json } => cmd_check(&config, json),
    }
}

fn load_config(path: &Path) -> Result<ReportConfig> {
    let (config, warnings) = ReportConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    for warning in &warnings {
        warn!("{warning}");
    }
    Ok(config)
}

/// Halting conditions end the process normally; they were already logged
fn report_halt(result: Result<(), PipelineHalt>) -> Result<()> {
    if let Err(halt) = result {
        error!("Stopping: {halt}");
    }
    Ok(())
}

fn cmd_run(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let sink = sink::from_config(&config.sink);
    let pipeline = Pipeline::new(&config);

    let result = Scheduler::new(&config.schedule, SystemClock)
        .run(|trigger, ctx| pipeline.run_trigger(sink.as_ref(), trigger, &ctx).map(|_| ()));

    if let Ok(summary) = &result {
        info!(
            "Scheduler finished: {} run(s), {} missed trigger(s), {} heartbeat(s)",
            summary.fired, summary.missed, summary.heartbeats
        );
    }
    report_halt(result.map(|_| ()))
}

fn cmd_once(path: &Path, label: &str, as_of: Option<NaiveDate>) -> Result<()> {
    let config = load_config(path)?;
    let trigger = config.trigger(label).with_context(|| {
        format!(
            "Unknown trigger '{label}' (configured: {})",
            trigger_labels(&config.schedule.triggers)
        )
    })?;

    let ctx = match as_of {
        Some(date) => RunContext::new(date.and_time(trigger.at)),
        None => RunContext::new(chrono::Local::now().naive_local()),
    };

    let sink = sink::from_config(&config.sink);
    let result = Pipeline::new(&config).run_trigger(sink.as_ref(), trigger, &ctx);
    report_halt(result.map(|_| ()))
}

fn cmd_check(path: &Path, json: bool) -> Result<()> {
    let (config, warnings) = ReportConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration OK: {}", path.display());
    println!("Operations address: {}", config.operations_address);
    println!(
        "Filter: '{}' before day {}",
        config.filter.designated_column, config.filter.day_threshold
    );
    println!("Triggers:");
    for trigger in &config.schedule.triggers {
        println!(
            "  {:<12} {}  {}{}",
            trigger.label,
            trigger.at,
            trigger.segments.join(", "),
            if trigger.terminal { "  (terminal)" } else { "" }
        );
    }
    for warning in &warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn trigger_labels(triggers: &[TriggerConfig]) -> String {
    triggers
        .iter()
        .map(|t| t.label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
