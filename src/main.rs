// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depth-pipeline")]
#[command(about = "Acquire and convert frames from a structured-light depth sensor")]
#[command(version = env!("DEPTH_PIPELINE_BUILD_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available depth sensors
    List,

    /// Run the pipeline and report frame rates
    Run {
        /// Run duration in seconds (Ctrl-C stops early)
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Config file (default: ~/.config/depth-pipeline/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Export one snapshot as PNG images and a LAS point cloud
    Capture {
        /// Output directory (default: ./capture_TIMESTAMP)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Config file (default: ~/.config/depth-pipeline/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the pipeline configuration
    Config {
        /// Print the built-in defaults instead of the loaded file
        #[arg(long)]
        print_default: bool,

        /// Config file (default: ~/.config/depth-pipeline/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=depth_pipeline=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_devices(),
        Commands::Run { seconds, config } => cli::run(seconds, config),
        Commands::Capture { output, config } => cli::capture(output, config),
        Commands::Config {
            print_default,
            config,
        } => cli::show_config(print_default, config),
    }
}
