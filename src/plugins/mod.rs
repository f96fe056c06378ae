// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Plugins
//!
//! Plugins run at named [`Hook`]s of the build, in registration order.
//! Each receives the explicit [`BuildState`]; which section of it a
//! plugin may write depends on the hook being run:
//!
//! | hook         | writable section                        |
//! |--------------|-----------------------------------------|
//! | `BeforeRun`  | [`BuildSettings`]                       |
//! | `Optimize`   | the chunk list                          |
//! | `HotUpdate`  | the [`Manifest`] (append, edit)         |
//! | `BeforeEmit` | the [`Manifest`] (append, edit)         |
//! | `AfterEmit`  | nothing                                 |
//!
//! Writing any other section fails with a `PluginError`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::bundle::{Chunk, ModuleIds};
use crate::core::config::Mode;
use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Plugin;
use crate::output::{Manifest, NamingTemplate};

/// Commons chunk and named module ids.
pub mod chunks;

/// Stylesheet extraction.
pub mod extract;

/// Hot update manifests.
pub mod hmr;

/// HTML page generation.
pub mod html;

/// Build lifecycle moments plugins can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Before the module graph is walked.
    BeforeRun,
    /// After chunks are formed, before they are rendered.
    Optimize,
    /// On rebuilds with changed files, once the manifest is complete.
    HotUpdate,
    /// Manifest complete and build hash known, nothing written yet.
    BeforeEmit,
    /// After every file is written.
    AfterEmit,
}

impl Hook {
    /// Every hook in execution order.
    pub const ALL: [Hook; 5] = [
        Hook::BeforeRun,
        Hook::Optimize,
        Hook::HotUpdate,
        Hook::BeforeEmit,
        Hook::AfterEmit,
    ];

    /// Kebab-case name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::BeforeRun => "before-run",
            Hook::Optimize => "optimize",
            Hook::HotUpdate => "hot-update",
            Hook::BeforeEmit => "before-emit",
            Hook::AfterEmit => "after-emit",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin name plus options, as declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Built-in plugin name.
    pub name: String,
    /// Plugin options.
    #[serde(default)]
    pub options: JsonMap<String, JsonValue>,
    /// Modes the plugin is enabled in; empty means every mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_in: Vec<Mode>,
}

impl PluginDescriptor {
    /// Creates a descriptor without options, enabled in every mode.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            options: JsonMap::new(),
            enabled_in: Vec::new(),
        }
    }

    /// Adds an option.
    pub fn with_option<K: Into<String>, V: Into<JsonValue>>(mut self, key: K, value: V) -> Self {
        _ = self.options.insert(key.into(), value.into());
        self
    }

    /// Whether the plugin runs in `mode`.
    pub fn enabled_for(&self, mode: Mode) -> bool {
        self.enabled_in.is_empty() || self.enabled_in.contains(&mode)
    }
}

/// Stylesheet extraction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSettings {
    /// Naming template of each chunk's stylesheet.
    pub filename: NamingTemplate,
}

/// Build-wide switches plugins may change at [`Hook::BeforeRun`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSettings {
    /// Extract stylesheets into files instead of injecting them.
    pub extract: Option<ExtractSettings>,
    /// How modules are identified in bundles.
    pub module_ids: ModuleIds,
}

/// Output URLs of one chunk, in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFiles {
    /// Chunk name.
    pub chunk: String,
    /// Script URLs.
    pub scripts: Vec<String>,
    /// Stylesheet URLs.
    pub styles: Vec<String>,
}

/// A module changed since the previous build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotModule {
    /// Bundle id of the module.
    pub id: String,
    /// Context-relative path.
    pub path: String,
    /// Chunks containing the module.
    pub chunks: Vec<String>,
}

/// State shared with plugins during one build.
#[derive(Debug)]
pub struct BuildState {
    hook: Hook,
    plugin: String,
    mode: Mode,
    context: PathBuf,
    public_path: String,
    pub(crate) settings: BuildSettings,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) manifest: Manifest,
    pub(crate) chunk_files: Vec<ChunkFiles>,
    pub(crate) build_hash: Option<String>,
    pub(crate) previous_hash: Option<String>,
    pub(crate) hot_modules: Vec<HotModule>,
}

impl BuildState {
    /// Creates the state of a fresh build.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(mode: Mode, context: P, public_path: S) -> Self {
        Self {
            hook: Hook::BeforeRun,
            plugin: String::new(),
            mode,
            context: context.into(),
            public_path: public_path.into(),
            settings: BuildSettings::default(),
            chunks: Vec::new(),
            manifest: Manifest::new(),
            chunk_files: Vec::new(),
            build_hash: None,
            previous_hash: None,
            hot_modules: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, hook: Hook, plugin: &str) {
        self.hook = hook;
        plugin.clone_into(&mut self.plugin);
    }

    fn read_only(&self, section: &str) -> AssetFlowError {
        AssetFlowError::plugin_error(
            self.plugin.clone(),
            self.hook.as_str(),
            format!("{} is read-only during {}", section, self.hook),
        )
    }

    /// Hook currently running.
    pub fn hook(&self) -> Hook {
        self.hook
    }

    /// Active build variant.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Project context directory.
    pub fn context(&self) -> &Path {
        &self.context
    }

    /// URL prefix of emitted files.
    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    /// Build settings.
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Writable build settings, during [`Hook::BeforeRun`] only.
    pub fn settings_mut(&mut self) -> Result<&mut BuildSettings> {
        match self.hook {
            Hook::BeforeRun => Ok(&mut self.settings),
            _ => Err(self.read_only("build settings")),
        }
    }

    /// Chunks in load order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Writable chunk list, during [`Hook::Optimize`] only.
    pub fn chunks_mut(&mut self) -> Result<&mut Vec<Chunk>> {
        match self.hook {
            Hook::Optimize => Ok(&mut self.chunks),
            _ => Err(self.read_only("the chunk set")),
        }
    }

    /// The output manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Writable manifest, during [`Hook::HotUpdate`] and
    /// [`Hook::BeforeEmit`] only.
    pub fn manifest_mut(&mut self) -> Result<&mut Manifest> {
        match self.hook {
            Hook::HotUpdate | Hook::BeforeEmit => Ok(&mut self.manifest),
            _ => Err(self.read_only("the manifest")),
        }
    }

    /// Output URLs per chunk, once chunks are rendered.
    pub fn chunk_files(&self) -> &[ChunkFiles] {
        &self.chunk_files
    }

    /// Hash of the manifest, known from [`Hook::HotUpdate`] on.
    pub fn build_hash(&self) -> Option<&str> {
        self.build_hash.as_deref()
    }

    /// Hash of the previous successful build, on rebuilds.
    pub fn previous_hash(&self) -> Option<&str> {
        self.previous_hash.as_deref()
    }

    /// Modules changed since the previous build.
    pub fn hot_modules(&self) -> &[HotModule] {
        &self.hot_modules
    }
}

/// Plugins in registration order.
#[derive(Debug, Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiates the built-in plugins named by `descriptors`.
    pub fn from_descriptors(descriptors: &[PluginDescriptor]) -> Result<Self> {
        let mut set = Self::new();
        for descriptor in descriptors {
            set.plugins.push(builtin(descriptor)?);
        }
        Ok(set)
    }

    /// Appends a plugin.
    pub fn register<P: Plugin + 'static>(&mut self, plugin: P) {
        self.plugins.push(Arc::new(plugin));
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs every plugin registered for `hook`.
    pub fn run(&self, hook: Hook, state: &mut BuildState) -> Result<()> {
        for plugin in self.plugins.iter().filter(|p| p.hooks().contains(&hook)) {
            debug!("Running plugin `{}` at {}", plugin.name(), hook);
            state.enter(hook, plugin.name());
            plugin.apply(hook, state).map_err(|e| match e {
                AssetFlowError::PluginError { .. } => e,
                other => AssetFlowError::plugin_error(
                    plugin.name(),
                    hook.as_str(),
                    other.to_string(),
                ),
            })?;
        }
        state.enter(hook, "");
        Ok(())
    }
}

fn builtin(descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>> {
    let options = &descriptor.options;
    let plugin: Arc<dyn Plugin> = match descriptor.name.as_str() {
        hmr::HOT_MODULE_REPLACEMENT => Arc::new(hmr::HotModuleReplacement::from_options(options)?),
        chunks::NAMED_MODULES => Arc::new(chunks::NamedModules),
        chunks::COMMONS_CHUNK => Arc::new(chunks::CommonsChunk::from_options(options)?),
        html::HTML => Arc::new(html::HtmlPlugin::from_options(options)?),
        extract::EXTRACT_CSS => Arc::new(extract::ExtractCss::from_options(options)?),
        other => {
            return Err(AssetFlowError::config_error(
                format!("Unknown plugin `{}`", other),
                None,
            ))
        }
    };
    Ok(plugin)
}

/// Reads an optional string option.
pub(crate) fn string_option(
    plugin: &str,
    options: &JsonMap<String, JsonValue>,
    key: &str,
) -> Result<Option<String>> {
    match options.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(AssetFlowError::config_error(
            format!(
                "Option `{}` of plugin `{}` must be a string, got {}",
                key, plugin, other
            ),
            None,
        )),
    }
}

/// Reads an optional boolean option.
pub(crate) fn bool_option(
    plugin: &str,
    options: &JsonMap<String, JsonValue>,
    key: &str,
    default: bool,
) -> Result<bool> {
    match options.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(other) => Err(AssetFlowError::config_error(
            format!(
                "Option `{}` of plugin `{}` must be a boolean, got {}",
                key, plugin, other
            ),
            None,
        )),
    }
}
