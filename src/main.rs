//! Elastiq CLI
//!
//! Inspection entry point for elastic quantization-aware training configs.
//!
//! # Usage
//!
//! ```bash
//! # Validate config
//! elastiq validate config.yaml
//!
//! # Show grid levels, schedules and projection error
//! elastiq info config.yaml --samples 4096
//!
//! # Project a few values onto the configured grid
//! elastiq project config.yaml --values 0.1,-0.7,2.5
//! ```

use clap::Parser;
use elastiq::config::{
    load_config, Cli, Command, InfoArgs, OutputFormat, ProjectArgs, QatSpec, ScheduleSpec,
    ValidateArgs,
};
use elastiq::quant::{
    analyze_error, theoretical_max_error, GeometricGrid, Grid, GridSpec, LinearGrid,
    QuantErrorStats,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LevelFilter::ERROR
    } else if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let quiet = cli.quiet;
    let result = match cli.command {
        Command::Validate(args) => run_validate(args, quiet),
        Command::Info(args) => run_info(args),
        Command::Project(args) => run_project(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_validate(args: ValidateArgs, quiet: bool) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    debug!(config = %args.config.display(), grid = %spec.quantize.grid, "validated");

    if !quiet {
        println!("Configuration is valid");
    }
    Ok(())
}

/// Everything `info` reports about a configuration
#[derive(Serialize)]
struct Report {
    grid: GridSpec,
    levels: Vec<f32>,
    support: (f32, f32),
    alpha: f32,
    beta: f32,
    alpha_schedule: Option<ScheduleSpec>,
    beta_schedule: Option<ScheduleSpec>,
    clamp_after_step: bool,
    optimizer: String,
    lr: f32,
    epochs: usize,
    theoretical_max_error: f32,
    error: QuantErrorStats,
}

fn run_info(args: InfoArgs) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let report = build_report(&spec, args.samples, &mut rng);

    match args.format {
        OutputFormat::Text => print_report(&report),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&report)
                .map_err(|e| format!("YAML serialization error: {e}"))?;
            println!("{yaml}");
        }
    }
    Ok(())
}

fn build_report<R: Rng + ?Sized>(spec: &QatSpec, samples: usize, rng: &mut R) -> Report {
    let quant = &spec.quantize;
    let (lo, hi) = quant.grid.support();
    let values: Vec<f32> = (0..samples).map(|_| rng.random_range(lo..=hi)).collect();

    let (theoretical, error) = match quant.grid {
        GridSpec::Linear { bottom, top, size } => {
            grid_error(&LinearGrid::new(bottom, top, size), &values)
        }
        GridSpec::Geometric { gamma, init, size } => {
            grid_error(&GeometricGrid::new(gamma, init, size), &values)
        }
    };

    Report {
        grid: quant.grid,
        levels: quant.grid.levels(),
        support: (lo, hi),
        alpha: quant.elastic.alpha,
        beta: quant.elastic.beta,
        alpha_schedule: quant.alpha_schedule,
        beta_schedule: quant.beta_schedule,
        clamp_after_step: quant.clamp_after_step,
        optimizer: spec.optimizer.name.clone(),
        lr: spec.optimizer.lr,
        epochs: spec.training.epochs,
        theoretical_max_error: theoretical,
        error,
    }
}

fn grid_error<G: Grid>(grid: &G, values: &[f32]) -> (f32, QuantErrorStats) {
    let bound = theoretical_max_error(grid);
    (bound, analyze_error(values, grid, bound))
}

fn print_report(report: &Report) {
    println!("Grid: {}", report.grid);
    println!("  Levels: {:?}", report.levels);
    println!("  Support: [{}, {}]", report.support.0, report.support.1);
    println!();
    println!("Elastic: alpha={} beta={}", report.alpha, report.beta);
    if let Some(schedule) = &report.alpha_schedule {
        println!("  Alpha schedule: {}", describe_schedule(schedule));
    }
    if let Some(schedule) = &report.beta_schedule {
        println!("  Beta schedule: {}", describe_schedule(schedule));
    }
    println!("  Clamp after step: {}", report.clamp_after_step);
    println!();
    println!("Optimizer: {} (lr={})", report.optimizer, report.lr);
    println!("Epochs: {}", report.epochs);
    println!();
    println!("Projection error over {} uniform samples:", report.error.num_samples);
    println!("  MSE: {:.6e}", report.error.mse);
    println!("  RMSE: {:.6}", report.error.rmse());
    println!("  MAE: {:.6}", report.error.mae);
    println!(
        "  Max: {:.6} (bound {:.6})",
        report.error.max_error, report.theoretical_max_error
    );
    println!("  SQNR: {:.2} dB", report.error.sqnr_db);
}

fn describe_schedule(schedule: &ScheduleSpec) -> String {
    match *schedule {
        ScheduleSpec::Constant { value } => format!("constant {value}"),
        ScheduleSpec::Linear { start, end, steps } => {
            format!("linear {start} -> {end} over {steps} epochs")
        }
        ScheduleSpec::Cosine { start, end, steps } => {
            format!("cosine {start} -> {end} over {steps} epochs")
        }
    }
}

fn run_project(args: ProjectArgs) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    let grid = spec.quantize.grid;
    for value in args.values {
        println!("{value} -> {}", grid.project_value(value));
    }
    Ok(())
}
