// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Module Graph
//!
//! The build walk. Starting from the resolved entries, every local
//! reference is followed:
//!
//! - scripts: `import ... from`, `export ... from`, `import()` and
//!   `require()` requests starting with `./` or `../`
//! - stylesheets: `@import` and `url()` references that are not remote,
//!   root-relative, data URIs or fragments
//! - Sass sources: `url()` only, since `@import`/`@use` are inlined by
//!   the compiler
//!
//! Bare package specifiers are external and never followed. Query
//! strings and fragments are stripped before a request is resolved.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, trace};
use regex::{Captures, Regex};

use crate::core::error::{AssetFlowError, Result};
use crate::entry::ResolvedEntry;
use crate::output::slash_path;

/// Index of a module in its [`ModuleGraph`].
pub type ModuleId = usize;

/// Extensions tried, in order, for extensionless script requests.
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx", "json"];

/// A reference from one module to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The request as written in the source.
    pub request: String,
    /// The module it resolved to.
    pub module: ModuleId,
}

/// A source file reached by the build walk.
#[derive(Debug, Clone)]
pub struct Module {
    /// Position in the graph.
    pub id: ModuleId,
    /// Normalised context-relative path.
    pub path: PathBuf,
    /// Path on disk.
    pub source: PathBuf,
    /// Outgoing references in source order.
    pub dependencies: Vec<Dependency>,
}

impl Module {
    /// `/`-separated context-relative path.
    pub fn name(&self) -> String {
        slash_path(&self.path)
    }
}

/// Every module reachable from the entries.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_path: HashMap<PathBuf, ModuleId>,
    entries: Vec<(String, ModuleId)>,
}

impl ModuleGraph {
    /// Walks the graph from `entries`, reading sources below `context`.
    pub fn build(context: &Path, entries: &[ResolvedEntry]) -> Result<Self> {
        let mut graph = Self::default();
        for entry in entries {
            let id = graph.visit(context, &normalize(&entry.path), &entry.source)?;
            graph.entries.push((entry.name.clone(), id));
        }
        debug!(
            "Module graph has {} modules from {} entries",
            graph.modules.len(),
            graph.entries.len()
        );
        Ok(graph)
    }

    fn visit(&mut self, context: &Path, path: &Path, source: &Path) -> Result<ModuleId> {
        if let Some(&id) = self.by_path.get(path) {
            return Ok(id);
        }

        let id = self.modules.len();
        _ = self.by_path.insert(path.to_path_buf(), id);
        self.modules.push(Module {
            id,
            path: path.to_path_buf(),
            source: source.to_path_buf(),
            dependencies: Vec::new(),
        });

        let requests = match ReferenceKind::from_path(path) {
            Some(kind) => {
                let bytes = fs::read(source)
                    .map_err(|e| AssetFlowError::io_error(source.to_path_buf(), e))?;
                scan(kind, &String::from_utf8_lossy(&bytes))
            }
            None => Vec::new(),
        };

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut dependencies = Vec::with_capacity(requests.len());
        for request in requests {
            let target = resolve_request(context, dir, &request).ok_or_else(|| {
                AssetFlowError::unresolved_import(
                    request.clone(),
                    context.join(dir).join(strip_query(&request)),
                    path.to_path_buf(),
                )
            })?;
            trace!("{} -> {}", slash_path(path), slash_path(&target));
            let module = self.visit(context, &target, &context.join(&target))?;
            if !dependencies.iter().any(|d: &Dependency| d.request == request) {
                dependencies.push(Dependency { request, module });
            }
        }
        self.modules[id].dependencies = dependencies;
        Ok(id)
    }

    /// Modules in discovery order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Looks a module up by id.
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Looks a module up by context-relative path.
    pub fn id_of(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(&normalize(path)).copied()
    }

    /// Entry names and their root modules, in entry order.
    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    /// Modules reachable from `root`, dependencies before dependents.
    pub fn reachable(&self, root: ModuleId) -> Vec<ModuleId> {
        let mut order = Vec::new();
        let mut visited = vec![false; self.modules.len()];
        self.post_order(root, &mut visited, &mut order);
        order
    }

    /// Every module, dependencies before dependents, walking the entries
    /// in order.
    pub fn processing_order(&self) -> Vec<ModuleId> {
        let mut order = Vec::with_capacity(self.modules.len());
        let mut visited = vec![false; self.modules.len()];
        for &(_, root) in &self.entries {
            self.post_order(root, &mut visited, &mut order);
        }
        order
    }

    fn post_order(&self, id: ModuleId, visited: &mut [bool], order: &mut Vec<ModuleId>) {
        if visited[id] {
            return;
        }
        visited[id] = true;
        // Iterative to keep deep import chains off the call stack.
        let mut stack = vec![(id, 0usize)];
        while let Some((current, next)) = stack.pop() {
            let deps = &self.modules[current].dependencies;
            if let Some(dep) = deps.get(next) {
                stack.push((current, next + 1));
                if !visited[dep.module] {
                    visited[dep.module] = true;
                    stack.push((dep.module, 0));
                }
            } else {
                order.push(current);
            }
        }
    }

    /// Ids of the modules depending directly on `id`.
    pub fn dependents(&self, id: ModuleId) -> Vec<ModuleId> {
        self.modules
            .iter()
            .filter(|m| m.dependencies.iter().any(|d| d.module == id))
            .map(|m| m.id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceKind {
    Script,
    Css,
    Sass,
}

impl ReferenceKind {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "js" | "mjs" | "cjs" | "jsx" => Some(ReferenceKind::Script),
            "css" => Some(ReferenceKind::Css),
            "scss" | "sass" => Some(ReferenceKind::Sass),
            _ => None,
        }
    }
}

/// Whether a script request is relative to the importing file.
pub fn is_local_request(request: &str) -> bool {
    request.starts_with("./") || request.starts_with("../")
}

/// Whether a stylesheet URL points at a file next to the stylesheet.
pub fn is_local_url(url: &str) -> bool {
    let url = url.trim();
    !(url.is_empty()
        || url.starts_with('/')
        || url.starts_with('#')
        || url.starts_with('~')
        || url.starts_with("data:")
        || url.contains("://"))
}

/// Removes a `?query` or `#fragment` suffix.
pub fn strip_query(request: &str) -> &str {
    request.split(['?', '#']).next().unwrap_or(request)
}

/// `import`/`export ... from` statements, anchored at the start of a
/// line.
fn statement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?m)^[ \t]*(?:import\s+(?:[\w$*{}\s,]+\s+from\s+)?|export\s+[\w$*{}\s,]+\s+from\s+)['"]([^'"\n]+)['"]"#,
        )
        .unwrap_or_else(|e| unreachable!("invalid statement pattern: {e}"))
    })
}

/// `require()` and dynamic `import()` calls with a literal request.
fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
            .unwrap_or_else(|e| unreachable!("invalid call pattern: {e}"))
    })
}

fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)/\*.*?\*/|(?m)(^|[\s;{}(),])//[^\n]*")
            .unwrap_or_else(|e| unreachable!("invalid comment pattern: {e}"))
    })
}

/// Blanks out comments so commented-out requests are not followed. A
/// `//` preceded by anything but whitespace or punctuation, as in a URL
/// string, is kept.
fn strip_comments(text: &str) -> Cow<'_, str> {
    comment_pattern().replace_all(text, |caps: &Captures<'_>| {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
    })
}

fn script_requests(text: &str) -> Vec<String> {
    let code = strip_comments(text);
    let mut found: Vec<(usize, String)> = statement_pattern()
        .captures_iter(&code)
        .chain(call_pattern().captures_iter(&code))
        .filter_map(|c| c.get(1))
        .map(|m| (m.start(), m.as_str().to_string()))
        .collect();
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, request)| request).collect()
}

fn css_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)['"]?|url\(\s*['"]?([^'")]+?)['"]?\s*\)"#,
        )
        .unwrap_or_else(|e| unreachable!("invalid css pattern: {e}"))
    })
}

fn scan(kind: ReferenceKind, text: &str) -> Vec<String> {
    let requests: Vec<String> = match kind {
        ReferenceKind::Script => script_requests(text)
            .into_iter()
            .filter(|r| is_local_request(r))
            .collect(),
        ReferenceKind::Css | ReferenceKind::Sass => css_pattern()
            .captures_iter(text)
            .filter_map(|c| match (c.get(1), c.get(2)) {
                (Some(import), _) if kind == ReferenceKind::Css => Some(import),
                (_, Some(url)) => Some(url),
                _ => None,
            })
            .map(|m| m.as_str().trim().to_string())
            .filter(|r| is_local_url(r))
            .collect(),
    };
    requests
}

/// Resolves `request` made from the context-relative directory `dir`,
/// returning a normalised context-relative path to an existing file.
fn resolve_request(context: &Path, dir: &Path, request: &str) -> Option<PathBuf> {
    let relative = normalize(&dir.join(strip_query(request)));
    let is_file = |candidate: &Path| context.join(candidate).is_file();

    if is_file(&relative) {
        return Some(relative);
    }
    if relative.extension().is_none() {
        for ext in SCRIPT_EXTENSIONS {
            let candidate = relative.with_extension(ext);
            if is_file(&candidate) {
                return Some(candidate);
            }
        }
        let index = relative.join("index.js");
        if is_file(&index) {
            return Some(index);
        }
    }
    None
}

/// Lexically normalises a relative path, keeping leading `..`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    _ = parts.pop();
                }
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}
