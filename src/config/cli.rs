//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! elastiq validate config.yaml
//! elastiq info config.yaml --samples 4096 --format json
//! elastiq project config.yaml --values 0.1,-0.7,2.5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Elastiq: elastic quantization-aware training
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "elastiq")]
#[command(version)]
#[command(about = "Inspect and validate elastic quantization-aware training configurations")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate a configuration file
    Validate(ValidateArgs),

    /// Show the grid, schedules and quantization error of a configuration
    Info(InfoArgs),

    /// Project values onto the configured grid
    Project(ProjectArgs),
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Number of uniform samples over the grid support for error statistics
    #[arg(short, long, default_value = "1024")]
    pub samples: usize,

    /// Seed for the sample generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the project command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ProjectArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Comma-separated values to project
    #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true, required = true)]
    pub values: Vec<f32>,
}

/// Output format for the info command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Unknown output format: {}. Valid formats: text, json, yaml",
                s
            )),
        }
    }
}

/// Parse command-line arguments
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
