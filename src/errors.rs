// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the depth pipeline
//!
//! Two layers, mirroring the two places a fault can come from:
//!
//! - [`SensorError`]: anything the sensor driver reports (device lookup, mode
//!   negotiation, stream start, frame delivery)
//! - [`PipelineError`]: construction and configuration failures of the
//!   pipeline itself, wrapping sensor errors
//!
//! Once a pipeline is running, faults are never returned to the caller. They
//! are logged and counted, and the only observable symptom is that the frame
//! counters stop advancing.

use std::io;

use thiserror::Error;

use crate::sensor::{PixelFormat, StreamKind};

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors reported by a sensor driver
#[derive(Debug, Clone, Error)]
pub enum SensorError {
    /// No device matched the requested identifier
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device has no sensor for the requested stream
    #[error("Device has no {0} sensor")]
    NoSensor(StreamKind),

    /// Mode negotiation failed
    #[error("No suitable {stream} mode: {detail}")]
    ModeNotFound { stream: StreamKind, detail: String },

    /// The driver applied a pixel format the pipeline cannot consume
    #[error("Unsupported {stream} format: {format}")]
    UnsupportedFormat {
        stream: StreamKind,
        format: PixelFormat,
    },

    /// A stream refused to start
    #[error("Failed to start {0} stream: {1}")]
    StreamStart(StreamKind, String),

    /// Any other nonzero status code from the driver
    #[error("{operation} failed: {message}")]
    Driver { operation: String, message: String },

    /// A delivered frame was truncated or otherwise unusable
    #[error("Corrupt {stream} frame: {detail}")]
    CorruptFrame { stream: StreamKind, detail: String },

    /// An operation was attempted on a stream that is not running
    #[error("{0} stream is not started")]
    NotStarted(StreamKind),
}

impl SensorError {
    /// Build a generic driver failure from an operation name and message
    pub fn driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        SensorError::Driver {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by pipeline construction, configuration and export
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sensor driver failure during initialization
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    /// Failed to spawn a pipeline thread
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[from] io::Error),

    /// Snapshot export failed
    #[error("Export error: {0}")]
    Export(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_error_display() {
        let err = SensorError::ModeNotFound {
            stream: StreamKind::Color,
            detail: "640x480 RGB888".to_string(),
        };
        assert_eq!(err.to_string(), "No suitable color mode: 640x480 RGB888");

        let err = SensorError::driver("open", "busy");
        assert_eq!(err.to_string(), "open failed: busy");
    }

    #[test]
    fn test_sensor_error_converts_to_pipeline_error() {
        let err: PipelineError = SensorError::DeviceNotFound("synthetic://9".into()).into();
        assert!(matches!(err, PipelineError::Sensor(SensorError::DeviceNotFound(_))));
        assert!(err.to_string().contains("synthetic://9"));
    }
}
