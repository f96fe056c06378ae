// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line interface for AssetFlow
//!
//! This module defines the `assetflow` command, loads the build
//! descriptor the way the subcommands share, and runs them.
//!
//! # Examples
//!
//! ```
//! use assetflow::cli;
//!
//! let matches = cli::build().get_matches_from(vec![
//!     "assetflow",
//!     "serve",
//!     "--mode",
//!     "production",
//!     "--port",
//!     "9000",
//! ]);
//!
//! let serve = matches.subcommand_matches("serve").unwrap();
//! assert_eq!(serve.get_one::<String>("mode").unwrap(), "production");
//! assert_eq!(serve.get_one::<u16>("port").unwrap(), &9000);
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{debug, info};

use crate::core::config::{
    ConfigBuilder, Mode, DEFAULT_CONFIG_FILE, ENV_PREFIX, STARTER_CONFIG,
};
use crate::core::error::{AssetFlowError, Result};
use crate::watch::{BuildStatus, Watcher};
use crate::{AssetFlow, BuildConfig};

/// The current version of AssetFlow, as defined in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Files `init` writes next to the configuration, unless they exist.
const SKELETON: &[(&str, &str)] = &[
    (
        "src/index.hbs",
        "<!DOCTYPE html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"utf-8\">\n    <title>{{title}}</title>\n  </head>\n  <body>\n    <h1>{{title}}</h1>\n  </body>\n</html>\n",
    ),
    (
        "src/js/index.js",
        "import '../scss/main.scss';\n\ndocument.title = 'AssetFlow';\n",
    ),
    ("src/js/vendor.js", "window.vendor = {};\n"),
    (
        "src/scss/main.scss",
        "$text: #222;\n\nbody {\n  color: $text;\n  font-family: sans-serif;\n}\n",
    ),
];

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Configuration file (defaults to ./assetflow.toml, then the starter descriptor)")
        .value_parser(value_parser!(PathBuf))
}

fn mode_arg() -> Arg {
    Arg::new("mode")
        .short('m')
        .long("mode")
        .help("Build variant, overriding ASSETFLOW_ENV")
        .value_parser(["development", "production"])
}

/// Builds and configures the AssetFlow command-line interface.
pub fn build() -> Command {
    debug!("Building CLI command structure");

    Command::new("assetflow")
        .author("AssetFlow Contributors")
        .about("A declarative static asset build pipeline.")
        .version(VERSION)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Raise the log level (-v debug, -vv trace)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(
            Command::new("build")
                .about("Build the project once")
                .arg(config_arg())
                .arg(mode_arg()),
        )
        .subcommand(
            Command::new("watch")
                .about("Rebuild the project whenever a source changes")
                .arg(config_arg())
                .arg(mode_arg()),
        )
        .subcommand(
            Command::new("serve")
                .about("Watch the project and serve its output")
                .arg(config_arg())
                .arg(mode_arg())
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .help("Port to serve on")
                        .value_parser(value_parser!(u16)),
                )
                .arg(
                    Arg::new("no-open")
                        .long("no-open")
                        .help("Do not open a browser")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Write the starter configuration and project skeleton")
                .arg(
                    Arg::new("dir")
                        .help("Project directory")
                        .value_parser(value_parser!(PathBuf))
                        .default_value("."),
                ),
        )
        .after_help(
            "\x1b[1;4mEnvironment:\x1b[0m\n\n  ASSETFLOW_ENV selects the build variant; other \
             ASSETFLOW_* variables override configuration keys \
             (ASSETFLOW_OUTPUT__PATH=build).\n\n\
             \x1b[1;4mLicense:\x1b[0m\n  The project is licensed under the terms of \
             both the MIT license and the Apache License (Version 2.0).",
        )
}

/// Executes the subcommand selected in `matches`.
///
/// # Returns
/// * `Result<()>` - Indicates success, or an error if execution fails.
pub fn execute(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("build", sub)) => {
            let mut flow = AssetFlow::new(load_config(sub)?)?;
            let report = flow.build()?;
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            println!(
                "Built {} ({} modules, {} files) in {:.2?}",
                report.hash,
                report.modules,
                report.files.len(),
                report.duration
            );
            Ok(())
        }
        Some(("watch", sub)) => {
            let flow = AssetFlow::new(load_config(sub)?)?;
            Watcher::new(flow, BuildStatus::shared()).run()
        }
        Some(("serve", sub)) => serve(sub),
        Some(("init", sub)) => {
            let dir = sub
                .get_one::<PathBuf>("dir")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("."));
            let written = init_project(&dir)?;
            if written.is_empty() {
                println!("Nothing to do, {} is already initialised", dir.display());
            }
            for path in written {
                println!("created {}", path.display());
            }
            Ok(())
        }
        _ => Err(AssetFlowError::internal_error("Unknown command")),
    }
}

#[cfg(feature = "server")]
fn serve(matches: &ArgMatches) -> Result<()> {
    crate::server::serve(AssetFlow::new(load_config(matches)?)?)
}

#[cfg(not(feature = "server"))]
fn serve(_matches: &ArgMatches) -> Result<()> {
    Err(AssetFlowError::config_error(
        "assetflow was built without the `server` feature",
        None,
    ))
}

/// Resolves the build descriptor for a subcommand.
///
/// An explicit `--config` must exist. Otherwise `./assetflow.toml` is
/// used when present and the starter descriptor, anchored at the
/// current directory, when not.
pub fn load_config(matches: &ArgMatches) -> Result<BuildConfig> {
    let mut builder = ConfigBuilder::new().with_env_prefix(ENV_PREFIX);

    match matches.get_one::<PathBuf>("config") {
        Some(path) => builder = builder.with_file(path),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            builder = builder.with_file(DEFAULT_CONFIG_FILE);
        }
        None => {
            let cwd = env::current_dir()
                .map_err(|e| AssetFlowError::io_error(PathBuf::from("."), e))?;
            info!("No {} found, using the starter descriptor", DEFAULT_CONFIG_FILE);
            builder = builder.with_base_dir(cwd);
        }
    }

    if let Some(mode) = matches.get_one::<String>("mode") {
        builder = builder.with_mode(mode.parse::<Mode>()?);
    }
    if let Ok(Some(port)) = matches.try_get_one::<u16>("port") {
        builder = builder.with_override("dev_server.port", i64::from(*port));
    }
    if matches.try_get_one::<bool>("no-open").ok().flatten() == Some(&true) {
        builder = builder.with_override("dev_server.open", false);
    }

    builder.build()
}

/// Writes the starter configuration and skeleton sources into `dir`,
/// leaving existing files untouched. Returns the files written.
pub fn init_project(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let files = std::iter::once((DEFAULT_CONFIG_FILE, STARTER_CONFIG)).chain(SKELETON.iter().copied());
    for (relative, contents) in files {
        let path = dir.join(relative);
        if path.exists() {
            debug!("Keeping existing {}", path.display());
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AssetFlowError::io_error(parent.to_path_buf(), e))?;
        }
        fs::write(&path, contents).map_err(|e| AssetFlowError::io_error(path.clone(), e))?;
        written.push(path);
    }
    info!("Initialised {} files in {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn get_matches(args: Vec<&str>) -> ArgMatches {
        build().get_matches_from(args)
    }

    #[test]
    fn test_build_command() {
        let matches = get_matches(vec![
            "assetflow",
            "-vv",
            "build",
            "--config",
            "site/assetflow.toml",
            "--mode",
            "production",
        ]);
        assert_eq!(matches.get_count("verbose"), 2);
        let build_cmd = matches.subcommand_matches("build").unwrap();
        assert_eq!(
            build_cmd.get_one::<PathBuf>("config").unwrap(),
            &PathBuf::from("site/assetflow.toml")
        );
        assert_eq!(build_cmd.get_one::<String>("mode").unwrap(), "production");
    }

    #[test]
    fn test_serve_command() {
        let matches = get_matches(vec!["assetflow", "serve", "--port", "8081", "--no-open"]);
        let serve_cmd = matches.subcommand_matches("serve").unwrap();
        assert_eq!(serve_cmd.get_one::<u16>("port").unwrap(), &8081);
        assert!(serve_cmd.get_flag("no-open"));
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        assert!(build()
            .try_get_matches_from(vec!["assetflow", "build", "--mode", "staging"])
            .is_err());
    }

    #[test]
    fn test_load_config_applies_flags() {
        let dir = TempDir::new().unwrap();
        _ = init_project(dir.path()).unwrap();
        let config = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = config.to_str().unwrap();

        let matches = get_matches(vec![
            "assetflow", "serve", "--config", config, "--mode", "production", "--port", "9001",
            "--no-open",
        ]);
        let loaded = load_config(matches.subcommand_matches("serve").unwrap()).unwrap();
        assert_eq!(loaded.mode, Mode::Production);
        assert_eq!(loaded.dev_server.port, 9001);
        assert!(!loaded.dev_server.open);
        assert!(loaded.plugins.iter().any(|p| p.name == "extract-css"));
    }

    #[test]
    fn test_init_keeps_existing_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/js")).unwrap();
        fs::write(dir.path().join("src/js/index.js"), "mine").unwrap();

        let written = init_project(dir.path()).unwrap();
        assert_eq!(written.len(), SKELETON.len());
        assert_eq!(
            fs::read_to_string(dir.path().join("src/js/index.js")).unwrap(),
            "mine"
        );
        assert!(init_project(dir.path()).unwrap().is_empty());
    }
}
