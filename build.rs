// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::io;
use std::process::Command;

/// Version of the source tree, eg. v0.1.0-3-gdeadbee-dirty. Fails outside of
/// a git checkout.
fn git_describe() -> Result<String, io::Error> {
    let output = Command::new("git")
        .args(["describe", "--always", "--tags", "--dirty"])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let vers = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if vers.is_empty() {
        return Err(io::Error::new(io::ErrorKind::Other, "empty git describe"));
    }
    Ok(vers)
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    match git_describe() {
        Ok(vers) => println!("cargo:rustc-env=BUILD_GIT_VERSION={}", vers),
        // the binary falls back to the package version
        Err(err) => println!("cargo:warning=cannot determine git version: {}", err),
    }
}
