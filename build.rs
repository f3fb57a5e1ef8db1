// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=DEPTH_PIPELINE_VERSION");

    // Packagers can pin the version string
    let version = std::env::var("DEPTH_PIPELINE_VERSION").unwrap_or_else(|_| build_version());

    println!("cargo::rustc-env=DEPTH_PIPELINE_BUILD_VERSION={}", version);
}

/// `<crate version>-<short commit>` inside a git checkout, crate version otherwise
fn build_version() -> String {
    let crate_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into());
    match commit_hash() {
        Some(hash) => format!("{}-{}", crate_version, hash),
        None => crate_version,
    }
}

fn commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
