// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # AssetFlow Library
//!
//! AssetFlow is a declarative static asset build pipeline. A build
//! descriptor names entry points, an ordered list of asset rules with
//! handler chains, output naming templates, development server settings
//! and lifecycle plugins; the [`AssetFlow`] driver executes it.
//!
//! A build runs entirely in memory: entries are resolved, the module
//! graph is walked, every module goes through the handler chain of the
//! first matching rule, chunks are assembled and plugins shape the
//! result. Files are written only once every stage has succeeded.
//!
//! For more information, visit the [AssetFlow documentation](https://docs.rs/assetflow).

#![doc = include_str!("../README.md")]
#![doc(html_root_url = "https://docs.rs/assetflow")]
#![crate_name = "assetflow"]
#![crate_type = "lib"]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::bundle::{
    entry_chunks, render_script, render_styles, ModuleOutput, ProcessedModule,
};
use crate::core::traits::{Handler, Plugin};
use crate::entry::EntryResolver;
use crate::graph::{Module, ModuleGraph, ModuleId};
use crate::handlers::{
    ContentKind, HandlerChain, HandlerContext, HandlerRegistry, Transformed,
};
use crate::output::{
    content_hash, slash_path, NameVars, NamingTemplate, OutputFile,
    OutputPlanner, OutputSource, HASH_LENGTH,
};
use crate::plugins::{BuildState, ChunkFiles, Hook, HotModule, PluginSet};
use crate::rules::{Fallthrough, Selection};

pub use crate::core::config::{BuildConfig, ConfigBuilder, Mode};
pub use crate::core::error::{AssetFlowError, Result};

/// Configuration, errors and extension traits.
pub mod core;

/// Chunk assembly.
pub mod bundle;

/// Command-line interface.
pub mod cli;

/// Entry point resolution.
pub mod entry;

/// The module graph walked by a build.
pub mod graph;

/// Transform stages of asset rules.
pub mod handlers;

/// Output naming and the in-memory manifest.
pub mod output;

/// Build lifecycle plugins.
pub mod plugins;

/// Asset rule matching.
pub mod rules;

/// Development server.
#[cfg(feature = "server")]
pub mod server;

/// Rebuild-on-change loop.
pub mod watch;

/// Summary of a finished build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Hash identifying the emitted output.
    pub hash: String,
    /// Written files.
    pub files: Vec<PathBuf>,
    /// Modules processed.
    pub modules: usize,
    /// Chunk names in load order.
    pub chunks: Vec<String>,
    /// Modules changed since the previous build, on rebuilds.
    pub changed: Vec<String>,
    /// Non-fatal problems, such as assets no rule matched.
    pub warnings: Vec<String>,
    /// Wall time of the build.
    pub duration: Duration,
}

/// The result of running a build in memory.
#[derive(Debug)]
pub struct Compilation {
    /// Plugin-visible state, holding the complete manifest.
    pub state: BuildState,
    /// Modules processed.
    pub modules: usize,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
    snapshot: Snapshot,
}

/// What the previous build produced, to work out changed modules.
///
/// Modules are fingerprinted by their processed output, so a module
/// whose result depends on files outside the graph (a Sass partial, say)
/// still counts as changed when those files change.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    hash: String,
    outputs: HashMap<PathBuf, String>,
}

/// The build driver.
///
/// Owns the resolved configuration, the handler chains of every rule
/// and the plugin set. Constructing it validates every handler and
/// plugin descriptor.
///
/// # Example
///
/// ```rust,no_run
/// use assetflow::{AssetFlow, ConfigBuilder, Mode};
///
/// let config = ConfigBuilder::new()
///     .with_file("assetflow.toml")
///     .with_mode(Mode::Production)
///     .build()?;
/// let mut flow = AssetFlow::new(config)?;
/// let report = flow.build()?;
/// println!("{} files, build {}", report.files.len(), report.hash);
/// # Ok::<(), assetflow::AssetFlowError>(())
/// ```
#[derive(Debug)]
pub struct AssetFlow {
    config: Arc<BuildConfig>,
    handlers: HandlerRegistry,
    plugins: PluginSet,
    chains: Vec<HandlerChain>,
    previous: Option<Snapshot>,
}

impl AssetFlow {
    /// Creates a driver using the built-in handlers and plugins.
    pub fn new(config: BuildConfig) -> Result<Self> {
        let plugins = PluginSet::from_descriptors(&config.plugins)
            .map_err(|e| with_config_path(e, &config))?;
        Self::with_parts(config, HandlerRegistry::with_builtins(), plugins)
    }

    /// Creates a driver from explicit handler and plugin sets.
    pub fn with_parts(
        config: BuildConfig,
        handlers: HandlerRegistry,
        plugins: PluginSet,
    ) -> Result<Self> {
        let chains = resolve_chains(&config, &handlers)?;
        debug!(
            "Driver ready: {} rules, plugins [{}]",
            chains.len(),
            plugins.names().join(", ")
        );
        Ok(Self {
            config: Arc::new(config),
            handlers,
            plugins,
            chains,
            previous: None,
        })
    }

    /// Registers an additional handler and re-resolves the rule chains.
    pub fn register_handler<H: Handler + 'static>(&mut self, handler: H) -> Result<()> {
        self.handlers.register(handler);
        self.chains = resolve_chains(&self.config, &self.handlers)?;
        Ok(())
    }

    /// Appends a plugin after the configured ones.
    pub fn register_plugin<P: Plugin + 'static>(&mut self, plugin: P) {
        self.plugins.register(plugin);
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Arc<BuildConfig> {
        &self.config
    }

    /// Runs a full build and writes its output.
    pub fn build(&mut self) -> Result<BuildReport> {
        self.run(false)
    }

    /// Runs a build after a change, running the `HotUpdate` hook for the
    /// modules whose output differs from the previous successful build.
    pub fn rebuild(&mut self) -> Result<BuildReport> {
        self.run(true)
    }

    fn run(&mut self, hot: bool) -> Result<BuildReport> {
        let started = Instant::now();
        let previous = if hot { self.previous.as_ref() } else { None };
        let mut compilation = self.compile_with(previous)?;

        let files = compilation
            .state
            .manifest()
            .emit(&self.config.output.path)?;
        // The output is on disk, so the next rebuild compares against it
        // even if an `AfterEmit` plugin fails.
        self.previous = Some(compilation.snapshot.clone());
        self.plugins.run(Hook::AfterEmit, &mut compilation.state)?;

        let report = BuildReport {
            hash: compilation.snapshot.hash.clone(),
            files,
            modules: compilation.modules,
            chunks: compilation
                .state
                .chunks()
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            changed: compilation
                .state
                .hot_modules()
                .iter()
                .map(|m| m.path.clone())
                .collect(),
            warnings: compilation.warnings,
            duration: started.elapsed(),
        };
        info!(
            "Build {} finished in {:.2?}: {} modules, {} files",
            report.hash,
            report.duration,
            report.modules,
            report.files.len()
        );
        Ok(report)
    }

    /// Runs a build to an in-memory manifest without writing anything.
    pub fn compile(&self) -> Result<Compilation> {
        self.compile_with(None)
    }

    fn compile_with(&self, previous: Option<&Snapshot>) -> Result<Compilation> {
        let config = &self.config;
        let mut state = BuildState::new(
            config.mode,
            config.context.clone(),
            config.output.public_path.clone(),
        );
        self.plugins.run(Hook::BeforeRun, &mut state)?;

        let entries = EntryResolver::new(&config.context).resolve_all(&config.entries)?;
        let graph = ModuleGraph::build(&config.context, &entries)?;

        state.chunks = entry_chunks(&graph);
        self.plugins.run(Hook::Optimize, &mut state)?;

        let mut planner = OutputPlanner::new();
        let mut warnings = Vec::new();
        let mut outputs = HashMap::new();
        let mut processed: BTreeMap<ModuleId, ProcessedModule> = BTreeMap::new();

        for id in graph.processing_order() {
            let Some(module) = graph.module(id) else {
                continue;
            };
            let contents = fs::read(&module.source)
                .map_err(|e| AssetFlowError::io_error(module.source.clone(), e))?;

            let output = self.process_module(
                module,
                contents,
                &processed,
                &mut state,
                &mut planner,
                &mut warnings,
            )?;
            _ = outputs.insert(module.path.clone(), fingerprint(&output, &state));
            _ = processed.insert(
                id,
                ProcessedModule {
                    id,
                    name: module.name(),
                    output,
                },
            );
        }

        self.assemble_chunks(&processed, &mut state, &mut planner)?;

        let hash = state.manifest.build_hash();
        state.build_hash = Some(hash.clone());

        if let Some(previous) = previous {
            state.previous_hash = Some(previous.hash.clone());
            state.hot_modules = changed_modules(&graph, &processed, &state, &outputs, previous);
            if !state.hot_modules.is_empty() {
                self.plugins.run(Hook::HotUpdate, &mut state)?;
            }
        }

        self.plugins.run(Hook::BeforeEmit, &mut state)?;

        Ok(Compilation {
            modules: processed.len(),
            state,
            warnings,
            snapshot: Snapshot { hash, outputs },
        })
    }

    fn process_module(
        &self,
        module: &Module,
        contents: Vec<u8>,
        processed: &BTreeMap<ModuleId, ProcessedModule>,
        state: &mut BuildState,
        planner: &mut OutputPlanner,
        warnings: &mut Vec<String>,
    ) -> Result<ModuleOutput> {
        let config = &self.config;
        let name = module.name();
        let extract = state.settings.extract.is_some();

        let transformed = match config.rules.select(&name) {
            Selection::Rule { index, .. } => {
                let chain = &self.chains[index];
                let prefix = chain
                    .public_path_override(extract)
                    .unwrap_or(config.output.public_path.as_str());
                let urls = reference_urls(module, processed, prefix);
                let ctx = HandlerContext {
                    asset: &module.path,
                    source: &module.source,
                    mode: config.mode,
                    extract,
                    urls: &urls,
                };
                let kind = ContentKind::from_path(&module.path);
                chain.execute(Transformed::new(contents, kind), &ctx)?
            }
            Selection::Fallthrough(policy) => {
                match policy {
                    Fallthrough::Error => {
                        return Err(AssetFlowError::config_error(
                            format!("No asset rule matches {}", name),
                            config.source.clone(),
                        ));
                    }
                    Fallthrough::Warn => {
                        warn!("No asset rule matches {}, copying it unmodified", name);
                        warnings.push(format!("no asset rule matches {}", name));
                    }
                    Fallthrough::Copy => debug!("Copying unmatched {}", name),
                }
                Transformed::new(contents, ContentKind::Binary)
            }
        };

        let output = match (transformed.emit, transformed.kind) {
            (Some(request), _) => {
                let template = NamingTemplate::parse(&request.template)?;
                let vars = NameVars::for_asset(&module.path, &transformed.contents);
                let path = planner.plan(&template, &vars, &name)?;
                emitted(state, module, path, transformed.contents)?
            }
            (None, ContentKind::Script) => {
                ModuleOutput::Script(into_text(transformed.contents, &name)?)
            }
            (None, ContentKind::ExtractedStyle) => {
                ModuleOutput::ExtractedStyle(into_text(transformed.contents, &name)?)
            }
            (None, ContentKind::Style | ContentKind::Binary) => {
                let path = planner.plan_path(&module.path, &name)?;
                emitted(state, module, path, transformed.contents)?
            }
        };
        Ok(output)
    }

    fn assemble_chunks(
        &self,
        processed: &BTreeMap<ModuleId, ProcessedModule>,
        state: &mut BuildState,
        planner: &mut OutputPlanner,
    ) -> Result<()> {
        let config = &self.config;
        let script_template = NamingTemplate::parse(&config.output.filename)
            .map_err(|e| with_config_path(e, config))?;
        let public_path = config.output.public_path.as_str();
        let ids = state.settings.module_ids;

        let mut chunk_files = Vec::with_capacity(state.chunks.len());
        // An entry chunk whose modules all moved to a commons chunk still
        // gets its bundle; only an empty commons chunk is skipped.
        for chunk in state.chunks.iter().filter(|c| !(c.commons && c.modules.is_empty())) {
            let owner = format!("chunk `{}`", chunk.name);
            let mut files = ChunkFiles {
                chunk: chunk.name.clone(),
                scripts: Vec::new(),
                styles: Vec::new(),
            };

            if let (Some(extract), Some(css)) =
                (&state.settings.extract, render_styles(chunk, processed))
            {
                let vars = NameVars::for_chunk(&chunk.name, "css", css.as_bytes());
                let path = planner.plan(&extract.filename, &vars, &owner)?;
                files.styles.push(format!("{}{}", public_path, slash_path(&path)));
                state.manifest.push(OutputFile {
                    path,
                    source: OutputSource::ChunkStyle(chunk.name.clone()),
                    contents: css.into_bytes(),
                })?;
            }

            let script = render_script(chunk, processed, ids, config.mode);
            let vars = NameVars::for_chunk(&chunk.name, "js", script.as_bytes());
            let path = planner.plan(&script_template, &vars, &owner)?;
            files.scripts.push(format!("{}{}", public_path, slash_path(&path)));
            state.manifest.push(OutputFile {
                path,
                source: OutputSource::ChunkScript(chunk.name.clone()),
                contents: script.into_bytes(),
            })?;

            chunk_files.push(files);
        }
        state.chunk_files = chunk_files;
        Ok(())
    }
}

fn resolve_chains(config: &BuildConfig, handlers: &HandlerRegistry) -> Result<Vec<HandlerChain>> {
    config
        .rules
        .rules()
        .iter()
        .map(|rule| handlers.chain(rule.chain()))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| with_config_path(e, config))
}

fn with_config_path(error: AssetFlowError, config: &BuildConfig) -> AssetFlowError {
    match error {
        AssetFlowError::ConfigError { message, path: None } => {
            AssetFlowError::config_error(message, config.source.clone())
        }
        other => other,
    }
}

/// Output URLs of the emitted files `module` references, keyed by
/// request.
fn reference_urls(
    module: &Module,
    processed: &BTreeMap<ModuleId, ProcessedModule>,
    prefix: &str,
) -> HashMap<String, String> {
    module
        .dependencies
        .iter()
        .filter_map(|dep| match processed.get(&dep.module).map(|p| &p.output) {
            Some(ModuleOutput::Emitted { url, .. }) => {
                Some((dep.request.clone(), format!("{}{}", prefix, url)))
            }
            _ => None,
        })
        .collect()
}

fn emitted(
    state: &mut BuildState,
    module: &Module,
    path: PathBuf,
    contents: Vec<u8>,
) -> Result<ModuleOutput> {
    let url = slash_path(&path);
    state.manifest.push(OutputFile {
        path: path.clone(),
        source: OutputSource::Asset(module.path.clone()),
        contents,
    })?;
    Ok(ModuleOutput::Emitted { path, url })
}

fn into_text(contents: Vec<u8>, name: &str) -> Result<String> {
    String::from_utf8(contents).map_err(|e| {
        AssetFlowError::internal_error(format!("{} produced invalid UTF-8: {}", name, e))
    })
}

/// Hash of what processing a module produced: its code, or the path and
/// contents of the file it emitted.
fn fingerprint(output: &ModuleOutput, state: &BuildState) -> String {
    match output {
        ModuleOutput::Script(text) | ModuleOutput::ExtractedStyle(text) => {
            content_hash(text.as_bytes(), HASH_LENGTH)
        }
        ModuleOutput::Emitted { path, url } => {
            let mut bytes = url.as_bytes().to_vec();
            if let Some(file) = state.manifest().get(path) {
                bytes.extend_from_slice(&file.contents);
            }
            content_hash(&bytes, HASH_LENGTH)
        }
    }
}

fn changed_modules(
    graph: &ModuleGraph,
    processed: &BTreeMap<ModuleId, ProcessedModule>,
    state: &BuildState,
    outputs: &HashMap<PathBuf, String>,
    previous: &Snapshot,
) -> Vec<HotModule> {
    let ids = state.settings().module_ids;
    graph
        .modules()
        .iter()
        .filter(|m| previous.outputs.get(&m.path) != outputs.get(&m.path))
        .filter_map(|m| processed.get(&m.id))
        .map(|p| HotModule {
            id: p.bundle_id(ids),
            path: p.name.clone(),
            chunks: state
                .chunks()
                .iter()
                .filter(|c| c.contains(p.id))
                .map(|c| c.name.clone())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigFile;
    use std::path::Path;
    use tempfile::TempDir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn write(root: &Path, path: &str, contents: &[u8]) {
        let target = root.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, contents).unwrap();
    }

    /// A project following the starter layout.
    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "src/js/index.js",
            b"import { greet } from './greet.js';\nimport '../scss/main.scss';\ngreet('world');\n",
        );
        write(root, "src/js/greet.js", b"export function greet(who) { console.log(`hi ${who}`); }\n");
        write(root, "src/js/vendor.js", b"import './greet.js';\nwindow.vendor = true;\n");
        write(
            root,
            "src/scss/main.scss",
            b"$brand: #ff6600;\n.logo { background: url('../images/logo.svg'); color: $brand; }\n\
              @font-face { font-family: Icons; src: url('../fonts/icon-font.svg'); }\n",
        );
        write(root, "src/images/logo.svg", b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
        write(root, "src/fonts/icon-font.svg", b"<svg><font/></svg>");
        write(
            root,
            "src/index.hbs",
            b"<!DOCTYPE html><html><head><title>{{title}}</title></head><body></body></html>",
        );
        dir
    }

    fn driver(root: &Path, mode: Mode) -> AssetFlow {
        let config = BuildConfig::resolve(ConfigFile::starter().unwrap(), mode, root, None).unwrap();
        AssetFlow::new(config).unwrap()
    }

    #[test]
    fn test_development_build_of_starter_project() {
        let dir = project();
        let report = driver(dir.path(), Mode::Development).build().unwrap();
        let dist = dir.path().join("dist");

        assert!(dist.join("images/logo.svg").is_file());
        assert!(dist.join("fonts/icon-font.svg").is_file());
        assert!(!dist.join("css").exists());

        let main = fs::read_to_string(dist.join("js/main.bundle.js")).unwrap();
        assert!(main.contains("data-assetflow-style"));
        assert!(main.contains("images/logo.svg"));
        assert!(main.contains("greet('world')"));
        // Shared with vendor, so moved to the commons chunk.
        assert!(!main.contains("function greet"));

        let vendor = fs::read_to_string(dist.join("js/vendor.bundle.js")).unwrap();
        assert!(vendor.contains("function greet"));
        assert!(vendor.contains("/* [src/js/greet.js] */"));
        for line in main.lines().chain(vendor.lines()) {
            let line = line.trim_start();
            assert!(!line.starts_with("export"), "module syntax left in: {line}");
            assert!(!line.starts_with("import"), "module syntax left in: {line}");
        }

        let html = fs::read_to_string(dist.join("index.html")).unwrap();
        let v = html.find("js/vendor.bundle.js").unwrap();
        let m = html.find("js/main.bundle.js").unwrap();
        assert!(v < m);
        assert_eq!(report.chunks, vec!["vendor", "main"]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_production_build_extracts_styles() {
        let dir = project();
        _ = driver(dir.path(), Mode::Production).build().unwrap();
        let dist = dir.path().join("dist");

        let css = fs::read_to_string(dist.join("css/main.css")).unwrap();
        assert!(css.contains("../images/logo.svg"));
        assert!(css.contains("#f60") || css.contains("#ff6600"));
        assert!(css.contains("../fonts/icon-font.svg"));

        let main = fs::read_to_string(dist.join("js/main.bundle.js")).unwrap();
        assert!(!main.contains("data-assetflow-style"));

        let html = fs::read_to_string(dist.join("index.html")).unwrap();
        assert!(html.contains("css/main.css?"));
    }

    #[test]
    fn test_failing_handler_aborts_and_writes_nothing() {
        let dir = project();
        write(dir.path(), "src/images/logo.svg", b"not an image");
        let err = driver(dir.path(), Mode::Development).build().unwrap_err();
        match err {
            AssetFlowError::TransformError { handler, asset, .. } => {
                assert_eq!(handler, "image");
                assert_eq!(asset, PathBuf::from("src/images/logo.svg"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("dist").exists());
    }

    #[test]
    fn test_missing_entry_fails_before_anything_is_written() {
        let dir = project();
        fs::remove_file(dir.path().join("src/js/vendor.js")).unwrap();
        let err = driver(dir.path(), Mode::Development).build().unwrap_err();
        assert!(matches!(err, AssetFlowError::ResolutionError { ref name, .. } if name == "vendor"));
        assert!(!dir.path().join("dist").exists());
    }

    #[test]
    fn test_fallthrough_policies() {
        let dir = project();
        write(dir.path(), "src/js/data.json", b"{}");
        write(
            dir.path(),
            "src/js/index.js",
            b"import data from './data.json';\nconsole.log(data);\n",
        );

        let report = driver(dir.path(), Mode::Development).build().unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(dir.path().join("dist/src/js/data.json").is_file());

        let mut file = ConfigFile::starter().unwrap();
        file.output.fallthrough = Fallthrough::Error;
        let config = BuildConfig::resolve(file, Mode::Development, dir.path(), None).unwrap();
        let err = AssetFlow::new(config).unwrap().compile().unwrap_err();
        assert!(matches!(err, AssetFlowError::ConfigError { .. }));
    }

    #[test]
    fn test_rebuild_emits_hot_update_for_changed_module() {
        let dir = project();
        let mut flow = driver(dir.path(), Mode::Development);
        let first = flow.build().unwrap();

        write(dir.path(), "src/js/greet.js", b"export function greet(who) { console.info(who); }\n");
        let second = flow.rebuild().unwrap();

        assert_eq!(second.changed, vec!["src/js/greet.js"]);
        let update = dir.path().join(format!("dist/{}.hot-update.json", first.hash));
        let json: serde_json::Value = serde_json::from_slice(&fs::read(update).unwrap()).unwrap();
        assert_eq!(json["hash"], second.hash.as_str());
        assert_eq!(json["modules"][0]["chunks"][0], "vendor");
    }

    #[test]
    fn test_rebuild_detects_edited_sass_partial() {
        let dir = project();
        write(dir.path(), "src/scss/_vars.scss", b"$brand: #ff6600;\n");
        write(
            dir.path(),
            "src/scss/main.scss",
            b"@import 'vars';\n.logo { background: url('../images/logo.svg'); color: $brand; }\n",
        );
        let mut flow = driver(dir.path(), Mode::Development);
        let first = flow.build().unwrap();

        write(dir.path(), "src/scss/_vars.scss", b"$brand: #0000ff;\n");
        let second = flow.rebuild().unwrap();

        assert_ne!(first.hash, second.hash);
        assert_eq!(second.changed, vec!["src/scss/main.scss"]);
        let update = dir.path().join(format!("dist/{}.hot-update.json", first.hash));
        let json: serde_json::Value = serde_json::from_slice(&fs::read(update).unwrap()).unwrap();
        assert_eq!(json["modules"][0]["chunks"][0], "main");
    }

    #[derive(Debug, Default)]
    struct FailsFirstEmit(std::sync::atomic::AtomicBool);

    impl Plugin for FailsFirstEmit {
        fn name(&self) -> &str {
            "fails-first-emit"
        }

        fn hooks(&self) -> &[Hook] {
            &[Hook::AfterEmit]
        }

        fn apply(&self, _hook: Hook, _state: &mut BuildState) -> Result<()> {
            if self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AssetFlowError::internal_error("notification failed"))
            }
        }
    }

    #[test]
    fn test_after_emit_failure_still_records_written_build() {
        let dir = project();
        let mut flow = driver(dir.path(), Mode::Development);
        flow.register_plugin(FailsFirstEmit::default());

        let err = flow.build().unwrap_err();
        assert!(matches!(err, AssetFlowError::PluginError { ref hook, .. } if hook == "after-emit"));
        assert!(dir.path().join("dist/js/main.bundle.js").is_file());

        write(dir.path(), "src/js/greet.js", b"export function greet(who) { console.info(who); }\n");
        let second = flow.rebuild().unwrap();
        assert_eq!(second.changed, vec!["src/js/greet.js"]);
    }

    #[test]
    fn test_entry_imported_by_another_entry_keeps_its_bundle() {
        let dir = project();
        write(dir.path(), "src/js/vendor.js", b"import './index.js';\nwindow.vendor = true;\n");
        let report = driver(dir.path(), Mode::Development).build().unwrap();
        let dist = dir.path().join("dist");

        assert_eq!(report.chunks, vec!["vendor", "main"]);
        assert!(dist.join("js/main.bundle.js").is_file());
        let vendor = fs::read_to_string(dist.join("js/vendor.bundle.js")).unwrap();
        assert!(vendor.contains("greet('world')"));
        let html = fs::read_to_string(dist.join("index.html")).unwrap();
        assert!(html.contains("js/main.bundle.js"));
    }

    #[test]
    fn test_compile_keeps_output_in_memory() {
        let dir = project();
        let compilation = driver(dir.path(), Mode::Development).compile().unwrap();
        assert!(compilation
            .state
            .manifest()
            .get(Path::new("js/main.bundle.js"))
            .is_some());
        assert!(!dir.path().join("dist").exists());
    }

    #[test]
    fn test_unknown_handler_fails_construction() {
        let dir = project();
        let mut file = ConfigFile::starter().unwrap();
        file.rules[0].chain = vec![crate::handlers::HandlerDescriptor::new("babel")];
        let config = BuildConfig::resolve(file, Mode::Development, dir.path(), None).unwrap();
        assert!(matches!(
            AssetFlow::new(config).unwrap_err(),
            AssetFlowError::ConfigError { .. }
        ));
    }

    #[test]
    fn test_colliding_outputs() {
        let dir = project();
        write(dir.path(), "src/images/a/x.png", PNG);
        write(dir.path(), "src/images/b/x.png", PNG);
        write(
            dir.path(),
            "src/js/index.js",
            b"import './../images/a/x.png';\nimport '../images/b/x.png';\n",
        );
        let err = driver(dir.path(), Mode::Development).build().unwrap_err();
        assert!(matches!(err, AssetFlowError::CollisionError { .. }));
    }
}
