//! Build script for modelport
//!
//! Embeds git revision, build timestamp and target triple so that
//! `modelport version` can report exactly which binary is running.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = git_output(&["rev-parse", "--short=8", "HEAD"]);
    let git_branch = git_output(&["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => {
            if output.stdout.is_empty() { "false" } else { "true" }
        }
        _ => "unknown",
    };

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=MODELPORT_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=MODELPORT_GIT_BRANCH={}", git_branch);
    println!("cargo:rustc-env=MODELPORT_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=MODELPORT_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=MODELPORT_TARGET={}", target);
    println!("cargo:rustc-env=MODELPORT_PROFILE={}", profile);
    println!("cargo:rustc-env=MODELPORT_RUSTC_VERSION={}", rustc_version);
}

/// Run a git command and return its trimmed stdout, or "unknown"
fn git_output(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
