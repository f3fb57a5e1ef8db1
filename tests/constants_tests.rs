// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use depth_pipeline::constants::{depth, kinect, pipeline};
use depth_pipeline::processing::CameraIntrinsics;

#[test]
fn test_depth_range_ordering() {
    // Invalid marker sits below the usable range
    assert!(depth::DEPTH_INVALID_MM < depth::DEPTH_MAX_MM);
}

#[test]
fn test_default_cutoff_matches_range() {
    let cutoff_mm = (pipeline::DEFAULT_MAX_DEPTH_M * depth::MM_PER_M).round() as u16;
    assert_eq!(cutoff_mm, depth::DEPTH_MAX_MM);
}

#[test]
fn test_pool_defaults_consistent() {
    assert!(pipeline::DEFAULT_WORKER_THREADS >= 1);
    assert!(pipeline::DEFAULT_CONVERTER_THREADS >= 1);
    assert!(pipeline::DEFAULT_CONVERTER_THREADS <= pipeline::DEFAULT_WORKER_THREADS);
}

#[test]
fn test_kinect_principal_point_inside_frame() {
    assert!(kinect::CX > 0.0 && kinect::CX < kinect::BASE_WIDTH);
    assert!(kinect::CY > 0.0 && kinect::CY < kinect::BASE_HEIGHT);
    assert!(kinect::COLOR_CX > 0.0 && kinect::COLOR_CX < kinect::BASE_WIDTH);
    assert!(kinect::COLOR_CY > 0.0 && kinect::COLOR_CY < kinect::BASE_HEIGHT);
}

#[test]
fn test_fov_focal_length_close_to_calibration() {
    // Focal length implied by the field of view should be near the factory value
    let fov = depth_pipeline::sensor::FieldOfView {
        horizontal: kinect::DEPTH_HFOV,
        vertical: kinect::DEPTH_VFOV,
    };
    let from_fov = CameraIntrinsics::from_fov(640, 480, fov);
    assert!((from_fov.fx - kinect::FX).abs() / kinect::FX < 0.05);
    assert!((from_fov.fy - kinect::FY).abs() / kinect::FY < 0.05);
}
