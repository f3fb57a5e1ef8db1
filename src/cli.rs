// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for pipeline operations
//!
//! This module provides command-line functionality for:
//! - Listing available sensors
//! - Running the pipeline and reporting frame rates
//! - Exporting a snapshot

use chrono::Local;
use depth_pipeline::export::export_snapshot;
use depth_pipeline::sensor::default_backend;
use depth_pipeline::{DepthPipeline, PipelineBuilder, PipelineConfig};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between frame rate reports
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// How long `capture` waits for the first converted frame
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// List all available sensors
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let backend = default_backend();
    let devices = DepthPipeline::find_devices(backend)?;

    if devices.is_empty() {
        println!("No depth sensors found.");
        return Ok(());
    }

    println!("Available depth sensors:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {} ({})", index, device.name, device.vendor);
        println!("      {}", device.uri);
    }

    Ok(())
}

/// Run the pipeline for `seconds`, printing per-stream frame rates
pub fn run(seconds: u64, config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path.as_deref())?;
    let mut pipeline = PipelineBuilder::new(default_backend())
        .config(config)
        .open()?;

    let handle = pipeline.shutdown_handle();
    ctrlc::set_handler(move || handle.request_shutdown())?;
    let stop = pipeline.shutdown_handle();

    let depth = pipeline.depth_dim();
    println!(
        "Running on {} ({}x{} depth) for {}s, press Ctrl-C to stop",
        pipeline.device_info().name,
        depth.width,
        depth.height,
        seconds
    );

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut last = (
        pipeline.depth_frame_number(),
        pipeline.color_frame_number(),
        pipeline.ir_frame_number(),
    );
    let mut last_report = Instant::now();

    while Instant::now() < deadline && !stop.is_shutdown_requested() && pipeline.is_running() {
        thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() < REPORT_INTERVAL {
            continue;
        }

        let elapsed = last_report.elapsed().as_secs_f64();
        let now = (
            pipeline.depth_frame_number(),
            pipeline.color_frame_number(),
            pipeline.ir_frame_number(),
        );
        println!(
            "depth {:5.1} fps | color {:5.1} fps | ir {:5.1} fps | t={:.3}s",
            (now.0 - last.0) as f64 / elapsed,
            (now.1 - last.1) as f64 / elapsed,
            (now.2 - last.2) as f64 / elapsed,
            pipeline.depth_frame_time()
        );
        last = now;
        last_report = Instant::now();
    }

    pipeline.shutdown();

    let stats = pipeline.stats();
    println!();
    println!(
        "Stopped after {} depth, {} color, {} ir frames",
        pipeline.depth_frame_number(),
        pipeline.color_frame_number(),
        pipeline.ir_frame_number()
    );
    println!(
        "Discarded {} frames, {} wait faults",
        stats.frames_discarded, stats.wait_faults
    );

    Ok(())
}

/// Export one converted frame into `output`
pub fn capture(
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path.as_deref())?;
    let mut pipeline = PipelineBuilder::new(default_backend())
        .config(config)
        .open()?;

    let started = Instant::now();
    while pipeline.depth_frame_number() == 0 {
        if started.elapsed() > FIRST_FRAME_TIMEOUT || !pipeline.is_running() {
            pipeline.shutdown();
            return Err("No depth frame received".into());
        }
        thread::sleep(Duration::from_millis(10));
    }

    let output = output.unwrap_or_else(|| {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("capture_{}", timestamp))
    });

    let summary = export_snapshot(&pipeline, &output);
    pipeline.shutdown();
    let summary = summary?;

    println!("Exported depth frame {}:", summary.depth_frame);
    for path in [
        &summary.depth_png,
        &summary.color_png,
        &summary.registered_png,
        &summary.point_cloud,
    ]
    .into_iter()
    .flatten()
    {
        println!("  {}", path.display());
    }
    println!("  {} points", summary.point_count);

    Ok(())
}

/// Print the effective or the default configuration as JSON
pub fn show_config(
    print_default: bool,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = if print_default {
        PipelineConfig::default()
    } else {
        load_config(config_path.as_deref())?
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match PipelineConfig::default_path() {
            Some(path) => path,
            None => return Ok(PipelineConfig::default()),
        },
    };
    Ok(PipelineConfig::load_or_default(&path)?)
}
