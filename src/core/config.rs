// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Configuration Module
//!
//! Loads and resolves the build descriptor. Declarations are read from a
//! TOML file (or the built-in starter descriptor), layered with the mode
//! flag, `ASSETFLOW_*` environment overrides and programmatic overrides,
//! then validated and resolved into an immutable [`BuildConfig`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use assetflow::core::config::{ConfigBuilder, Mode};
//!
//! let config = ConfigBuilder::new()
//!     .with_file("assetflow.toml")
//!     .with_env_prefix("ASSETFLOW_")
//!     .with_mode(Mode::Production)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.mode, Mode::Production);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use toml::Value as TomlValue;

use crate::core::error::{AssetFlowError, Result};
use crate::handlers::HandlerDescriptor;
use crate::plugins::PluginDescriptor;
use crate::rules::{AssetRule, Fallthrough, Pattern, RuleSet};

/// Prefix of environment variables that override configuration keys.
pub const ENV_PREFIX: &str = "ASSETFLOW_";

/// The single environment variable selecting the build variant.
pub const MODE_ENV_VAR: &str = "ASSETFLOW_ENV";

/// File name looked up when no configuration file is given.
pub const DEFAULT_CONFIG_FILE: &str = "assetflow.toml";

/// The starter descriptor used when no configuration file exists.
pub const STARTER_CONFIG: &str = include_str!("starter.toml");

/// Build variant selected by the mode flag.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Inline styles, readable output, hot module replacement.
    #[default]
    Development,
    /// Extracted stylesheets and minified output.
    Production,
}

impl Mode {
    /// Reads the mode from [`MODE_ENV_VAR`], if set.
    pub fn from_env() -> Result<Option<Self>> {
        match env::var(MODE_ENV_VAR) {
            Ok(value) => value.parse().map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Returns the lowercase name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl FromStr for Mode {
    type Err = AssetFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(AssetFlowError::config_error(
                format!(
                    "Unknown mode '{}', expected 'development' or 'production'",
                    other
                ),
                None,
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The build descriptor as declared in `assetflow.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_context")]
    /// Project root, relative to the configuration file's directory.
    pub context: PathBuf,

    #[serde(default)]
    /// Mode declared in the file; the mode flag takes precedence.
    pub mode: Option<Mode>,

    #[serde(default)]
    /// Named entry points, relative to the context.
    pub entries: BTreeMap<String, PathBuf>,

    #[serde(default)]
    /// Output settings.
    pub output: OutputDecl,

    #[serde(default)]
    /// Ordered asset rules.
    pub rules: Vec<RuleDecl>,

    #[serde(default)]
    /// Development server settings.
    pub dev_server: DevServerDecl,

    #[serde(default)]
    /// Ordered plugin descriptors.
    pub plugins: Vec<PluginDescriptor>,
}

impl ConfigFile {
    /// Parses a descriptor from TOML text.
    pub fn parse(text: &str, path: Option<&Path>) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            AssetFlowError::config_error(
                format!("Failed to parse config file: {}", e),
                path.map(Path::to_path_buf),
            )
        })
    }

    /// Returns the built-in starter descriptor.
    pub fn starter() -> Result<Self> {
        Self::parse(STARTER_CONFIG, None)
    }
}

/// Output declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    #[serde(default = "default_output_path")]
    /// Output directory, relative to the context.
    pub path: PathBuf,

    #[serde(default = "default_filename")]
    /// Naming template of chunk bundles.
    pub filename: String,

    #[serde(default)]
    /// Prefix prepended to emitted asset URLs.
    pub public_path: String,

    #[serde(default)]
    /// What happens to assets no rule matches.
    pub fallthrough: Fallthrough,
}

impl Default for OutputDecl {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            filename: default_filename(),
            public_path: String::new(),
            fallthrough: Fallthrough::default(),
        }
    }
}

/// One declared asset rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecl {
    /// Regular expression matched against context-relative paths.
    pub test: String,

    #[serde(default)]
    /// Regular expressions that veto the rule.
    pub exclude: Vec<String>,

    #[serde(default)]
    /// Match `test` case-insensitively.
    pub case_insensitive: bool,

    #[serde(rename = "use", default)]
    /// Handler chain used when no mode-specific chain is declared.
    pub chain: Vec<HandlerDescriptor>,

    #[serde(default)]
    /// Chain replacing `use` in development mode.
    pub development: Option<Vec<HandlerDescriptor>>,

    #[serde(default)]
    /// Chain replacing `use` in production mode.
    pub production: Option<Vec<HandlerDescriptor>>,
}

impl RuleDecl {
    /// Picks the chain declared for `mode`.
    fn chain_for(&self, mode: Mode) -> &[HandlerDescriptor] {
        let variant = match mode {
            Mode::Development => self.development.as_deref(),
            Mode::Production => self.production.as_deref(),
        };
        variant.unwrap_or(&self.chain)
    }
}

/// Development server declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerDecl {
    #[serde(default = "default_content_base")]
    /// Directory served when a path is not part of the build output.
    pub content_base: PathBuf,

    #[serde(default = "default_host")]
    /// Interface to bind.
    pub host: String,

    #[serde(default = "default_port")]
    /// Port to bind.
    pub port: u16,

    #[serde(default = "default_true")]
    /// Gzip responses.
    pub compress: bool,

    #[serde(default = "default_true")]
    /// Emit hot update manifests on rebuilds.
    pub hot: bool,

    #[serde(default)]
    /// Open a browser once the server is listening.
    pub open: bool,

    #[serde(default = "default_debounce_ms")]
    /// Debounce window of the file watcher, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for DevServerDecl {
    fn default() -> Self {
        Self {
            content_base: default_content_base(),
            host: default_host(),
            port: default_port(),
            compress: true,
            hot: true,
            open: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Resolved output settings.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Output directory.
    pub path: PathBuf,
    /// Naming template of chunk bundles.
    pub filename: String,
    /// Prefix prepended to emitted asset URLs.
    pub public_path: String,
}

/// Resolved development server settings.
#[derive(Debug, Clone)]
pub struct DevServerSettings {
    /// Directory served as fallback.
    pub content_base: PathBuf,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Gzip responses.
    pub compress: bool,
    /// Emit hot update manifests on rebuilds.
    pub hot: bool,
    /// Open a browser once listening.
    pub open: bool,
    /// Debounce window of the file watcher, in milliseconds.
    pub debounce_ms: u64,
}

/// The resolved, immutable build descriptor.
///
/// Constructed once per build invocation; rule chains and plugins are
/// already narrowed to [`BuildConfig::mode`].
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Project root every relative path is resolved against.
    pub context: PathBuf,
    /// Selected build variant.
    pub mode: Mode,
    /// Named entry points, relative to the context.
    pub entries: BTreeMap<String, PathBuf>,
    /// Output settings.
    pub output: OutputSettings,
    /// Ordered asset rules and the fallthrough policy.
    pub rules: RuleSet,
    /// Development server settings.
    pub dev_server: DevServerSettings,
    /// Plugins enabled for the selected mode, in registration order.
    pub plugins: Vec<PluginDescriptor>,
    /// Configuration file the descriptor came from, if any.
    pub source: Option<PathBuf>,
}

impl BuildConfig {
    /// Resolves declarations for `mode`, with relative paths anchored at
    /// `base_dir`.
    pub fn resolve(
        file: ConfigFile,
        mode: Mode,
        base_dir: &Path,
        source: Option<PathBuf>,
    ) -> Result<Self> {
        validate_declarations(&file, source.as_deref())?;

        let context = base_dir.join(&file.context);

        let mut rules = Vec::with_capacity(file.rules.len());
        for (index, decl) in file.rules.iter().enumerate() {
            let test = Pattern::new(&decl.test, decl.case_insensitive)
                .map_err(|e| with_path(e, source.as_deref()))?;
            let exclude = decl
                .exclude
                .iter()
                .map(|p| Pattern::new(p, false))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| with_path(e, source.as_deref()))?;
            let chain = decl.chain_for(mode).to_vec();
            if chain.is_empty() {
                return Err(AssetFlowError::config_error(
                    format!(
                        "Rule #{} (`{}`) has an empty handler chain in {} mode",
                        index + 1,
                        decl.test,
                        mode
                    ),
                    source.clone(),
                ));
            }
            rules.push(AssetRule::new(test, exclude, chain));
        }

        let plugins = file
            .plugins
            .into_iter()
            .filter(|p| p.enabled_for(mode))
            .collect();

        let config = Self {
            output: OutputSettings {
                path: context.join(&file.output.path),
                filename: file.output.filename,
                public_path: file.output.public_path,
            },
            rules: RuleSet::new(rules, file.output.fallthrough),
            dev_server: DevServerSettings {
                content_base: context.join(&file.dev_server.content_base),
                host: file.dev_server.host,
                port: file.dev_server.port,
                compress: file.dev_server.compress,
                hot: file.dev_server.hot,
                open: file.dev_server.open,
                debounce_ms: file.dev_server.debounce_ms,
            },
            entries: file.entries,
            plugins,
            context,
            mode,
            source,
        };
        debug!(
            "Resolved {} entries, {} rules and {} plugins for {} mode",
            config.entries.len(),
            config.rules.len(),
            config.plugins.len(),
            config.mode
        );
        Ok(config)
    }
}

/// Builds a [`BuildConfig`] by layering declarations and overrides.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<PathBuf>,
    base_dir: Option<PathBuf>,
    env_prefix: Option<String>,
    mode: Option<Mode>,
    overrides: Vec<(String, TomlValue)>,
}

impl ConfigBuilder {
    /// Initialises a new `ConfigBuilder` instance with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads declarations from a TOML configuration file. Without a
    /// file, the starter descriptor is used.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Directory relative paths are anchored at when no file is given.
    pub fn with_base_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.base_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Applies environment variables starting with `prefix` as overrides.
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Forces the build variant, taking precedence over everything else.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Overrides one configuration key, e.g. `output.path` or
    /// `dev_server.port`.
    pub fn with_override<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<TomlValue>,
    {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Loads, layers, validates and resolves the configuration.
    pub fn build(self) -> Result<BuildConfig> {
        let (mut file, base_dir) = match &self.config_file {
            Some(path) => {
                let file = load_from_file(path)?;
                let base = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                (file, base)
            }
            None => (
                ConfigFile::starter()?,
                self.base_dir.clone().unwrap_or_default(),
            ),
        };

        if let Some(prefix) = &self.env_prefix {
            apply_env_overrides(&mut file, prefix, env::vars())?;
        }

        for (key, value) in &self.overrides {
            apply_config_value(&mut file, key, &toml_to_string(value))?;
        }

        let mode = self.mode.or(file.mode).unwrap_or_default();
        BuildConfig::resolve(file, mode, &base_dir, self.config_file)
    }
}

// Internal helper functions

fn load_from_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        AssetFlowError::config_error(
            format!("Failed to read config file: {}", e),
            Some(path.to_path_buf()),
        )
    })?;
    ConfigFile::parse(&content, Some(path))
}

fn toml_to_string(value: &TomlValue) -> String {
    match value {
        TomlValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn with_path(error: AssetFlowError, path: Option<&Path>) -> AssetFlowError {
    match error {
        AssetFlowError::ConfigError { message, path: None } => {
            AssetFlowError::config_error(message, path.map(Path::to_path_buf))
        }
        other => other,
    }
}

fn apply_env_overrides<I>(
    config: &mut ConfigFile,
    prefix: &str,
    vars: I,
) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(prefix) {
            let config_key = stripped
                .trim_start_matches('_')
                .to_lowercase()
                .replace("__", ".");
            if config_key.is_empty() {
                continue;
            }
            match apply_config_value(config, &config_key, &value) {
                Ok(()) => debug!("Applied {} from the environment", key),
                Err(AssetFlowError::ConfigError { message, .. })
                    if message.starts_with("Unknown configuration") =>
                {
                    warn!("Ignoring {}: {}", key, message);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

fn apply_config_value(
    config: &mut ConfigFile,
    key: &str,
    value: &str,
) -> Result<()> {
    let value = value.trim_matches('"');
    match key {
        "context" => config.context = PathBuf::from(value),
        "env" | "mode" => config.mode = Some(value.parse()?),
        _ => {
            let Some((section, key)) = key.split_once('.') else {
                return Err(AssetFlowError::config_error(
                    format!("Unknown configuration key: {}", key),
                    None,
                ));
            };
            match section {
                "output" => apply_output_value(&mut config.output, key, value)?,
                "dev_server" => {
                    apply_dev_server_value(&mut config.dev_server, key, value)?
                }
                "entries" => {
                    _ = config
                        .entries
                        .insert(key.to_string(), PathBuf::from(value));
                }
                _ => {
                    return Err(AssetFlowError::config_error(
                        format!("Unknown configuration section: {}", section),
                        None,
                    ));
                }
            }
        }
    }
    Ok(())
}

fn apply_output_value(
    config: &mut OutputDecl,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "path" => config.path = PathBuf::from(value),
        "filename" => config.filename = value.to_string(),
        "public_path" => config.public_path = value.to_string(),
        "fallthrough" => config.fallthrough = value.parse()?,
        _ => {
            return Err(AssetFlowError::config_error(
                format!("Unknown configuration key: output.{}", key),
                None,
            ));
        }
    }
    Ok(())
}

fn apply_dev_server_value(
    config: &mut DevServerDecl,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "content_base" => config.content_base = PathBuf::from(value),
        "host" => config.host = value.to_string(),
        "port" => config.port = parse_value(key, value)?,
        "compress" => config.compress = parse_value(key, value)?,
        "hot" => config.hot = parse_value(key, value)?,
        "open" => config.open = parse_value(key, value)?,
        "debounce_ms" => config.debounce_ms = parse_value(key, value)?,
        _ => {
            return Err(AssetFlowError::config_error(
                format!("Unknown configuration key: dev_server.{}", key),
                None,
            ));
        }
    }
    Ok(())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        AssetFlowError::config_error(
            format!("Invalid {} value '{}': {}", key, value, e),
            None,
        )
    })
}

fn validate_declarations(
    file: &ConfigFile,
    path: Option<&Path>,
) -> Result<()> {
    if file.entries.is_empty() {
        return Err(AssetFlowError::config_error(
            "No entry points declared",
            path.map(Path::to_path_buf),
        ));
    }

    if file.output.filename.trim().is_empty() {
        return Err(AssetFlowError::config_error(
            "output.filename must not be empty",
            path.map(Path::to_path_buf),
        ));
    }

    if file.entries.len() > 1 && !file.output.filename.contains("[name]") {
        return Err(AssetFlowError::config_error(
            "output.filename must contain [name] when several entries are declared",
            path.map(Path::to_path_buf),
        ));
    }

    let mut seen = HashMap::new();
    for plugin in &file.plugins {
        if plugin.name.trim().is_empty() {
            return Err(AssetFlowError::config_error(
                "Plugin descriptor without a name",
                path.map(Path::to_path_buf),
            ));
        }
        *seen.entry(plugin.name.as_str()).or_insert(0usize) += 1;
    }
    if let Some((name, _)) = seen.iter().find(|(_, count)| **count > 1) {
        warn!("Plugin `{}` is registered more than once", name);
    }

    Ok(())
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("dist")
}

fn default_filename() -> String {
    "js/[name].bundle.js".to_string()
}

fn default_content_base() -> PathBuf {
    PathBuf::from("src")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_debounce_ms() -> u64 {
    200
}
