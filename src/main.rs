// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # AssetFlow CLI
//!
//! This is the main entry point for the AssetFlow command-line interface.
//! It initialises the logger from the verbosity flag and runs the
//! selected subcommand.

use anyhow::Context;
use assetflow::cli;
use env_logger::Env;
use log::debug;

/// Maps the `-v` count to a default log filter; `RUST_LOG` wins.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run() -> anyhow::Result<()> {
    let matches = cli::build().get_matches();
    init_logger(matches.get_count("verbose"));

    let command = matches.subcommand_name().unwrap_or_default().to_string();
    debug!("Running `{}`", command);
    cli::execute(&matches).with_context(|| format!("assetflow {} failed", command))
}

/// The main entry point for the AssetFlow CLI.
fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
