// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{depth, paths, pipeline};
use crate::errors::{PipelineError, PipelineResult};
use crate::processing::ColorSampling;

/// Secondary stream started alongside depth
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum SyncStream {
    /// Color camera; enables registration
    #[default]
    Color,
    /// Infrared camera; registration stays off
    Infrared,
}

/// Pipeline configuration, fixed once the pipeline is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Device URI, or the first available device when unset
    pub device_uri: Option<String>,
    /// Mirror world-space x (selfie convention)
    pub mirror: bool,
    /// Depth samples beyond this distance are invalid (metres)
    pub max_depth_m: f32,
    /// Ask the driver to crop depth to the color field of view
    pub crop_depth_to_color: bool,
    /// Stream started next to depth
    pub sync_stream: SyncStream,
    /// Threads in the conversion pool
    pub worker_threads: usize,
    /// Ranges each conversion job is split into
    pub converter_threads: usize,
    /// Bounded wait per stream and iteration (milliseconds)
    pub frame_wait_timeout_ms: u64,
    /// Registration sampling
    pub color_sampling: ColorSampling,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_uri: None,
            mirror: true, // Default to mirrored (selfie mode)
            max_depth_m: pipeline::DEFAULT_MAX_DEPTH_M,
            crop_depth_to_color: false,
            sync_stream: SyncStream::default(),
            worker_threads: pipeline::DEFAULT_WORKER_THREADS,
            converter_threads: pipeline::DEFAULT_CONVERTER_THREADS,
            frame_wait_timeout_ms: pipeline::DEFAULT_FRAME_WAIT_TIMEOUT_MS,
            color_sampling: ColorSampling::default(),
        }
    }
}

impl PipelineConfig {
    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> PipelineResult<()> {
        if self.worker_threads == 0 {
            return Err(PipelineError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.converter_threads == 0 || self.converter_threads > self.worker_threads {
            return Err(PipelineError::Config(format!(
                "converter_threads must be between 1 and worker_threads ({}), got {}",
                self.worker_threads, self.converter_threads
            )));
        }
        if !(self.max_depth_m.is_finite() && self.max_depth_m > 0.0) {
            return Err(PipelineError::Config(format!(
                "max_depth_m must be positive, got {}",
                self.max_depth_m
            )));
        }
        if self.frame_wait_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "frame_wait_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Depth cutoff in millimetres, clamped to the 16-bit sample range
    pub fn max_depth_mm(&self) -> u16 {
        (self.max_depth_m * depth::MM_PER_M)
            .round()
            .clamp(0.0, u16::MAX as f32) as u16
    }

    /// `<config dir>/depth-pipeline/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(paths::CONFIG_DIR_NAME).join(paths::CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> PipelineResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Config(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|e| {
            PipelineError::Config(format!("failed to write {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Saved pipeline config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_depth_mm(), 4500);
    }

    #[test]
    fn test_converter_threads_bounded_by_pool() {
        let config = PipelineConfig {
            worker_threads: 2,
            converter_threads: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_non_positive_depth_rejected() {
        let config = PipelineConfig {
            max_depth_m: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "mirror": false, "sync_stream": "Infrared" }"#).unwrap();
        assert!(!config.mirror);
        assert_eq!(config.sync_stream, SyncStream::Infrared);
        assert_eq!(config.worker_threads, pipeline::DEFAULT_WORKER_THREADS);
    }
}
