// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use depth_pipeline::{ColorSampling, PipelineConfig, PipelineError, SyncStream};

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = PipelineConfig::default();

    // Check sensible defaults
    assert!(config.mirror, "Mirror should be enabled by default");
    assert_eq!(config.sync_stream, SyncStream::Color);
    assert_eq!(config.color_sampling, ColorSampling::Nearest);
    assert!(config.device_uri.is_none());
    assert!(config.converter_threads <= config.worker_threads);
}

#[test]
fn test_config_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let config = PipelineConfig {
        device_uri: Some("synthetic://1".to_string()),
        mirror: false,
        max_depth_m: 3.0,
        sync_stream: SyncStream::Infrared,
        color_sampling: ColorSampling::Bilinear,
        ..Default::default()
    };
    config.save(&path).unwrap();

    let loaded = PipelineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.max_depth_mm(), 3000);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, PipelineConfig::default());
}

#[test]
fn test_invalid_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        PipelineConfig::load_or_default(&path),
        Err(PipelineError::Config(_))
    ));

    // Parses, but violates the pool invariant
    std::fs::write(&path, r#"{ "worker_threads": 1, "converter_threads": 2 }"#).unwrap();
    assert!(matches!(
        PipelineConfig::load(&path),
        Err(PipelineError::Config(_))
    ));
}

#[test]
fn test_default_path_location() {
    if let Some(path) = PipelineConfig::default_path() {
        assert!(path.ends_with("depth-pipeline/config.json"));
    }
}
