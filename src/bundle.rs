// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Chunk Assembly
//!
//! Every entry becomes a [`Chunk`]. Once its modules are processed, a
//! chunk's script-kind outputs are concatenated into its bundle and its
//! extracted stylesheets into its stylesheet. Module order inside a
//! chunk is dependencies first, so a module's imports always precede it.
//!
//! Bundles are plain concatenations with a comment header per module,
//! loaded as classic scripts that share the page's global scope. ES module
//! syntax is rewritten on the way in:
//!
//! - `import` statements and `export ... from` re-exports are commented
//!   out; local targets are already bundled and bare packages are
//!   expected as page globals
//! - `export` prefixes of declarations are dropped, so exported bindings
//!   become globals other modules and chunks can see
//! - an anonymous `export default` value is bound to a
//!   `__assetflow_default_<id>` variable

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::core::config::Mode;
use crate::graph::{ModuleGraph, ModuleId};

/// How modules are identified inside bundles.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModuleIds {
    /// Graph indices.
    #[default]
    Numeric,
    /// Context-relative paths.
    Named,
}

/// A named group of modules emitted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk name, used for `[name]` in output templates.
    pub name: String,
    /// Member modules, dependencies first.
    pub modules: Vec<ModuleId>,
    /// Whether this chunk holds modules shared by other chunks.
    pub commons: bool,
}

impl Chunk {
    /// Whether `module` belongs to this chunk.
    pub fn contains(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }
}

/// One chunk per entry, in entry order.
pub fn entry_chunks(graph: &ModuleGraph) -> Vec<Chunk> {
    graph
        .entries()
        .iter()
        .map(|(name, root)| Chunk {
            name: name.clone(),
            modules: graph.reachable(*root),
            commons: false,
        })
        .collect()
}

/// What processing a module produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutput {
    /// Code for the chunk bundle.
    Script(String),
    /// CSS for the chunk stylesheet.
    ExtractedStyle(String),
    /// A standalone output file.
    Emitted {
        /// Path relative to the output directory.
        path: PathBuf,
        /// URL other assets use to reference it.
        url: String,
    },
}

/// A processed module, ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedModule {
    /// Graph id.
    pub id: ModuleId,
    /// `/`-separated context-relative path.
    pub name: String,
    /// The processing result.
    pub output: ModuleOutput,
}

impl ProcessedModule {
    /// The identifier written into bundles.
    pub fn bundle_id(&self, ids: ModuleIds) -> String {
        match ids {
            ModuleIds::Numeric => self.id.to_string(),
            ModuleIds::Named => self.name.clone(),
        }
    }
}

/// Concatenates the script outputs of `chunk`.
pub fn render_script(
    chunk: &Chunk,
    modules: &BTreeMap<ModuleId, ProcessedModule>,
    ids: ModuleIds,
    mode: Mode,
) -> String {
    let mut out = format!("/* AssetFlow chunk `{}` ({}) */\n", chunk.name, mode);
    for module in chunk.modules.iter().filter_map(|id| modules.get(id)) {
        match &module.output {
            ModuleOutput::Script(code) => {
                out.push_str(&header(module, ids));
                out.push_str(&strip_module_syntax(code, module.id));
                if !code.ends_with('\n') {
                    out.push('\n');
                }
            }
            ModuleOutput::Emitted { url, .. } if mode == Mode::Development => {
                out.push_str(&format!(
                    "/* [{}] {} -> {} */\n",
                    module.bundle_id(ids),
                    module.name,
                    url
                ));
            }
            _ => {}
        }
    }
    out
}

/// Concatenates the extracted stylesheets of `chunk`, or `None` when it
/// has none.
pub fn render_styles(
    chunk: &Chunk,
    modules: &BTreeMap<ModuleId, ProcessedModule>,
) -> Option<String> {
    let styles: Vec<&str> = chunk
        .modules
        .iter()
        .filter_map(|id| modules.get(id))
        .filter_map(|m| match &m.output {
            ModuleOutput::ExtractedStyle(css) => Some(css.as_str()),
            _ => None,
        })
        .collect();
    if styles.is_empty() {
        return None;
    }
    let mut css = styles.join("\n");
    if !css.ends_with('\n') {
        css.push('\n');
    }
    Some(css)
}

fn header(module: &ProcessedModule, ids: ModuleIds) -> String {
    match ids {
        ModuleIds::Numeric => format!("/* [{}] {} */\n", module.id, module.name),
        ModuleIds::Named => format!("/* [{}] */\n", module.name),
    }
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?m)^[ \t]*(?:import\s+(?:[\w$*{}\s,]+\s+from\s+)?['"][^'"\n]+['"]|export\s*\{[^}]*\}(?:\s*from\s*['"][^'"\n]+['"])?|export\s*\*(?:\s*as\s+[\w$]+)?\s*from\s*['"][^'"\n]+['"])[ \t]*;?"#,
        )
        .unwrap_or_else(|e| unreachable!("invalid import pattern: {e}"))
    })
}

fn default_declaration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\s*\*?\s*[\w$]+|class\s+[\w$]+)",
        )
        .unwrap_or_else(|e| unreachable!("invalid export pattern: {e}"))
    })
}

fn default_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s+default\s+")
            .unwrap_or_else(|e| unreachable!("invalid export pattern: {e}"))
    })
}

fn export_declaration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s+((?:const|let|var|function|class|async)\b)")
            .unwrap_or_else(|e| unreachable!("invalid export pattern: {e}"))
    })
}

/// Rewrites the ES module syntax of module `id` into classic script code.
fn strip_module_syntax(code: &str, id: ModuleId) -> String {
    let code = import_pattern().replace_all(code, |caps: &Captures<'_>| {
        format!("/* {} */", caps[0].trim())
    });
    let code = default_declaration_pattern().replace_all(&code, "$1$2");
    let binding = format!("${{1}}var __assetflow_default_{} = ", id);
    let code = default_value_pattern().replace_all(&code, binding.as_str());
    export_declaration_pattern()
        .replace_all(&code, "$1$2")
        .into_owned()
}
