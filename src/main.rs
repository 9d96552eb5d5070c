use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use pacing_model::logging::init_logging;
use pacing_model::store::csv::parse_timestamp;
use pacing_model::{
    AppConfig, AutoFitResult, CrossCycleAggregator, CsvSampleStore, EnergyForecastResult,
    EvaluationReport, FitRange, ModelEvaluator, Orchestrator, TrainingOutcome,
};

/// Pacing - energy level calibration and forecasting
///
/// Learns how heart rate drains and restores a person's energy from their
/// own validated ratings, then forecasts the energy level a couple of hours
/// ahead.
#[derive(Parser)]
#[command(name = "pacing")]
#[command(version)]
#[command(about = "Energy level calibration and forecasting", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DataArgs {
    /// Heart-rate CSV (timestamp,bpm)
    #[arg(long = "heart-rate", value_name = "FILE")]
    heart_rate: PathBuf,

    /// Validated energy CSV (timestamp,percentage[,validation])
    #[arg(long, value_name = "FILE")]
    energy: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate personal model parameters from history
    Fit {
        #[command(flatten)]
        data: DataArgs,

        /// Which cycles to fit (all, month, week)
        #[arg(short, long)]
        range: Option<FitRange>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retrain as of a point in time and forecast energy
    Forecast {
        #[command(flatten)]
        data: DataArgs,

        /// Forecast time (defaults to now)
        #[arg(long, value_name = "TIMESTAMP")]
        at: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fit on all history and backtest against every rating
    Evaluate {
        #[command(flatten)]
        data: DataArgs,

        /// Which cycles to fit (all, month, week)
        #[arg(short, long)]
        range: Option<FitRange>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run scheduled retraining and forecasting until interrupted
    Run {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Show or initialize the configuration file
    Config {
        /// Print the effective configuration
        #[arg(short, long)]
        show: bool,

        /// Write a default configuration file
        #[arg(short, long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct CycleRow {
    #[tabled(rename = "Cycle")]
    label: String,
    #[tabled(rename = "HR low")]
    hr_low: String,
    #[tabled(rename = "HR high")]
    hr_high: String,
    #[tabled(rename = "Drain")]
    drain: String,
    #[tabled(rename = "Recovery")]
    recovery: String,
    #[tabled(rename = "Offset")]
    offset: String,
    #[tabled(rename = "Loss")]
    loss: String,
    #[tabled(rename = "Points")]
    points: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    match cli.command {
        Commands::Fit { data, range, json } => fit(&config, &data, range, json),
        Commands::Forecast { data, at, json } => forecast(&config, &data, at.as_deref(), json),
        Commands::Evaluate { data, range, json } => evaluate(&config, &data, range, json),
        Commands::Run { data } => run(config, &data),
        Commands::Config { show, init, force } => manage_config(config, cli.config, show, init, force),
    }
}

fn open_store(data: &DataArgs) -> Result<CsvSampleStore> {
    CsvSampleStore::open(&data.heart_rate, &data.energy).with_context(|| {
        format!(
            "Failed to load samples from {} and {}",
            data.heart_rate.display(),
            data.energy.display()
        )
    })
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn auto_fit(config: &AppConfig, data: &DataArgs, range: Option<FitRange>) -> Result<AutoFitResult> {
    let store = open_store(data)?;
    let (heart_rate, validated) = store.all()?;
    let aggregator = CrossCycleAggregator::with_config(&config.model);
    let range = range.unwrap_or(config.model.calibration.fit_range);

    let pb = spinner("Fitting sleep cycles...")?;
    let result = aggregator.auto_fit_range(&heart_rate, &validated, range);
    pb.finish_and_clear();
    Ok(result)
}

fn fmt_loss(loss: f64) -> String {
    if loss.is_finite() {
        format!("{:.2}", loss)
    } else {
        "-".to_string()
    }
}

fn print_fit(result: &AutoFitResult, max_loss: f64) {
    if result.day_results.is_empty() {
        println!("{}", "No usable sleep cycles found".yellow());
    } else {
        let rows: Vec<CycleRow> = result
            .day_results
            .iter()
            .map(|d| CycleRow {
                label: if d.loss.is_finite() && d.loss < max_loss {
                    d.label.clone()
                } else {
                    format!("{} (rejected)", d.label)
                },
                hr_low: format!("{:.1}", d.hr_low),
                hr_high: format!("{:.1}", d.hr_high),
                drain: format!("{:.2}", d.drain_factor),
                recovery: format!("{:.2}", d.recovery_factor),
                offset: format!("{:.1}", d.energy_offset),
                loss: fmt_loss(d.loss),
                points: d.data_points,
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    println!();
    println!(
        "Cycles used: {}/{}",
        result.used_days.to_string().bold(),
        result.total_days
    );
    println!("Loss:        {}", fmt_loss(result.loss));
    if result.used_days > 0 {
        println!("{} {}", "Parameters:".green().bold(), result.parameters);
    } else {
        println!(
            "{} {}",
            "Parameters (defaults):".yellow().bold(),
            result.parameters
        );
    }
}

fn fit(config: &AppConfig, data: &DataArgs, range: Option<FitRange>, json: bool) -> Result<()> {
    let result = auto_fit(config, data, range)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", "Calibration".blue().bold());
        print_fit(&result, config.model.calibration.max_accepted_loss);
    }
    Ok(())
}

fn parse_at(at: Option<&str>) -> Result<DateTime<Utc>> {
    match at {
        Some(value) => parse_timestamp(value)
            .with_context(|| format!("Unable to parse timestamp: {}", value)),
        None => Ok(Utc::now()),
    }
}

fn print_forecast(result: &EnergyForecastResult) {
    println!(
        "  {}  now {:>5.1}%   {} {:>5.1}%   ({})",
        result.time.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        result.percentage_now * 100.0,
        result.time_future.format("%H:%M"),
        result.percentage_future * 100.0,
        result.source
    );
}

fn forecast(config: &AppConfig, data: &DataArgs, at: Option<&str>, json: bool) -> Result<()> {
    let now = parse_at(at)?;
    let store = Arc::new(open_store(data)?);
    let orchestrator = Orchestrator::new(store, config.model.clone(), config.schedule.clone());

    let pb = spinner("Training...")?;
    let outcome = orchestrator.retrain(now);
    pb.finish_and_clear();
    let result = orchestrator.predict(now);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match &outcome {
        TrainingOutcome::Trained { .. } => println!("{} {}", "✓".green(), outcome),
        _ => println!("{} {}", "!".yellow(), outcome),
    }
    println!("  Model: {}", orchestrator.snapshot().parameters);
    println!("{}", "Forecast".blue().bold());
    print_forecast(&result);
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    println!("{}", "Backtest".blue().bold());
    println!("  Ratings:     {}", report.n);
    println!("  RMSE:        {:.2}", report.rmse);
    println!("  MAE:         {:.2}", report.mae);
    println!("  Bias:        {:+.2}", report.bias);
    match report.correlation {
        Some(r) => println!("  Correlation: {:.3}", r),
        None => println!("  Correlation: -"),
    }
}

fn evaluate(config: &AppConfig, data: &DataArgs, range: Option<FitRange>, json: bool) -> Result<()> {
    let fit = auto_fit(config, data, range)?;
    let (heart_rate, validated) = open_store(data)?.all()?;

    let evaluator = ModelEvaluator::with_config(&config.model);
    let report = evaluator
        .evaluate(&heart_rate, &validated, &fit.parameters)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} {}", "Parameters:".bold(), fit.parameters);
        print_report(&report);
    }
    Ok(())
}

fn run(config: AppConfig, data: &DataArgs) -> Result<()> {
    let store = Arc::new(open_store(data)?);
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        config.model.clone(),
        config.schedule.clone(),
    ));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(async move {
        let mut forecasts = orchestrator.subscribe();
        let handle = orchestrator.spawn();
        println!(
            "{}",
            "Forecasting, press Ctrl-C to stop".green().bold()
        );

        loop {
            tokio::select! {
                received = forecasts.recv() => match received {
                    Ok(result) => print_forecast(&result),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Missed forecasts");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        handle.shutdown().await;
        println!("{}", "Stopped".dimmed());
        Ok(())
    });

    // A retrain already on the blocking pool cannot be interrupted
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    result
}

fn manage_config(
    mut config: AppConfig,
    path: Option<PathBuf>,
    show: bool,
    init: bool,
    force: bool,
) -> Result<()> {
    let path = path.unwrap_or_else(AppConfig::default_config_path);

    if init {
        if path.exists() && !force {
            anyhow::bail!(
                "{} already exists, use --force to overwrite",
                path.display()
            );
        }
        let mut fresh = AppConfig::default();
        fresh.save_to_file(&path)?;
        println!("{} Wrote {}", "✓".green(), path.display());
        config = fresh;
    }

    if show || !init {
        println!("{}", describe_source(&path).dimmed());
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn describe_source(path: &Path) -> String {
    if path.exists() {
        format!("# {}", path.display())
    } else {
        "# built-in defaults".to_string()
    }
}
