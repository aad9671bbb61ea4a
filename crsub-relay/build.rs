//! Build script for crsub-relay
//!
//! Exposes to the binary, via `env!`:
//! - `GIT_HASH`: short commit, suffixed `-modified` for a dirty tree
//! - `BUILD_TIMESTAMP`: local time of the build, RFC 3339
//! - `BUILD_PROFILE`: cargo profile (debug/release)

use std::process::Command;

/// Trimmed stdout of a git command, `None` outside a repository
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    let git_hash = git(&["describe", "--always", "--abbrev=8", "--dirty=-modified"])
        .unwrap_or_else(|| "unknown".to_string());

    let build_timestamp = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    for (name, value) in [
        ("GIT_HASH", git_hash),
        ("BUILD_TIMESTAMP", build_timestamp),
        ("BUILD_PROFILE", profile),
    ] {
        println!("cargo:rustc-env={}={}", name, value);
    }

    // Track HEAD so a new commit refreshes GIT_HASH without a clean build
    if let Some(head) = git(&["rev-parse", "--git-path", "HEAD"]) {
        println!("cargo:rerun-if-changed={}", head);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
