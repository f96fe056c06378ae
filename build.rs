// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Build script checking the compiler meets the minimum supported version.

/// Minimum supported Rust version, kept in sync with `rust-version` in `Cargo.toml`.
const MIN_VERSION: &str = "1.74.0";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    match version_check::is_min_version(MIN_VERSION) {
        Some(true) => {}
        Some(false) => {
            eprintln!(
                "assetflow requires rustc {} or newer; please update your toolchain",
                MIN_VERSION
            );
            std::process::exit(1);
        }
        None => {
            println!("cargo:warning=unable to determine the rustc version");
        }
    }
}
