// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Output Planning
//!
//! Decides where every produced file lands and collects the files of one
//! build in an in-memory [`Manifest`]. Nothing reaches the disk until
//! [`Manifest::emit`] is called, which the driver only does once every
//! stage of the build has succeeded.
//!
//! ## Naming templates
//!
//! | placeholder                 | value                                        |
//! |-----------------------------|----------------------------------------------|
//! | `[name]`                    | file stem, or the chunk name                 |
//! | `[ext]`                     | extension without the dot                    |
//! | `[path]`                    | context-relative directory, with trailing `/`|
//! | `[hash]`, `[contenthash]`   | first 20 hex chars of the blake3 hash        |
//! | `[hash:N]`                  | first `N` hex chars                          |

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::core::error::{AssetFlowError, Result};

/// Hex characters kept from a content hash by default.
pub const HASH_LENGTH: usize = 20;

/// Hex digest of `contents`, truncated to `len` characters.
pub fn content_hash(contents: &[u8], len: usize) -> String {
    let mut hex = blake3::hash(contents).to_hex().to_string();
    hex.truncate(len);
    hex
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Ext,
    Path,
    Hash(usize),
}

/// A parsed naming template such as `js/[name].[hash:8].js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    /// Parses `template`, rejecting unknown or unterminated placeholders.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find('[') {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let Some(len) = rest[start..].find(']') else {
                return Err(AssetFlowError::config_error(
                    format!("Unterminated placeholder in naming template `{}`", template),
                    None,
                ));
            };
            let placeholder = &rest[start + 1..start + len];
            segments.push(parse_placeholder(placeholder, template)?);
            rest = &rest[start + len + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders the template into a normalised path relative to the
    /// output directory.
    pub fn render(&self, vars: &NameVars<'_>) -> Result<PathBuf> {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Name => rendered.push_str(vars.name),
                Segment::Ext => rendered.push_str(vars.ext),
                Segment::Path => {
                    if !vars.dir.is_empty() {
                        rendered.push_str(vars.dir.trim_end_matches('/'));
                        rendered.push('/');
                    }
                }
                Segment::Hash(len) => {
                    rendered.push_str(&content_hash(vars.contents, *len))
                }
            }
        }
        normalize_output_path(&rendered, &self.source)
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_placeholder(placeholder: &str, template: &str) -> Result<Segment> {
    let unknown = || {
        AssetFlowError::config_error(
            format!(
                "Unknown placeholder `[{}]` in naming template `{}`",
                placeholder, template
            ),
            None,
        )
    };
    match placeholder {
        "name" => Ok(Segment::Name),
        "ext" => Ok(Segment::Ext),
        "path" => Ok(Segment::Path),
        "hash" | "contenthash" => Ok(Segment::Hash(HASH_LENGTH)),
        other => {
            let (kind, len) = other.split_once(':').ok_or_else(unknown)?;
            if kind != "hash" && kind != "contenthash" {
                return Err(unknown());
            }
            match len.parse::<usize>() {
                Ok(n) if (1..=64).contains(&n) => Ok(Segment::Hash(n)),
                _ => Err(AssetFlowError::config_error(
                    format!(
                        "Hash length in `[{}]` must be between 1 and 64 (template `{}`)",
                        placeholder, template
                    ),
                    None,
                )),
            }
        }
    }
}

/// Values substituted into a [`NamingTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct NameVars<'a> {
    /// `[name]`
    pub name: &'a str,
    /// `[ext]`
    pub ext: &'a str,
    /// `[path]`
    pub dir: &'a str,
    /// Hashed for `[hash]`.
    pub contents: &'a [u8],
}

impl<'a> NameVars<'a> {
    /// Variables for a source file at context-relative `path`.
    pub fn for_asset(path: &'a Path, contents: &'a [u8]) -> Self {
        Self {
            name: path.file_stem().and_then(|s| s.to_str()).unwrap_or(""),
            ext: path.extension().and_then(|s| s.to_str()).unwrap_or(""),
            dir: path.parent().and_then(|p| p.to_str()).unwrap_or(""),
            contents,
        }
    }

    /// Variables for a chunk output.
    pub fn for_chunk(name: &'a str, ext: &'a str, contents: &'a [u8]) -> Self {
        Self {
            name,
            ext,
            dir: "",
            contents,
        }
    }
}

/// Lexically normalises `rendered`, failing when it is empty, absolute
/// or climbs out of the output directory.
fn normalize_output_path(rendered: &str, template: &str) -> Result<PathBuf> {
    let escapes = || {
        AssetFlowError::config_error(
            format!(
                "Output path `{}` (from template `{}`) escapes the output directory",
                rendered, template
            ),
            None,
        )
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(rendered).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(escapes)?),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(escapes());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }
    if parts.is_empty() {
        return Err(AssetFlowError::config_error(
            format!("Template `{}` produced an empty output path", template),
            None,
        ));
    }
    Ok(parts.iter().collect())
}

/// `/`-separated form of a relative path, used for URLs and rule
/// matching.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Assigns output paths and enforces that distinct sources never share
/// one.
#[derive(Debug, Clone, Default)]
pub struct OutputPlanner {
    claims: HashMap<PathBuf, String>,
}

impl OutputPlanner {
    /// Creates an empty planner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders `template` for `source` and claims the resulting path.
    pub fn plan(
        &mut self,
        template: &NamingTemplate,
        vars: &NameVars<'_>,
        source: &str,
    ) -> Result<PathBuf> {
        let path = template.render(vars)?;
        self.claim(&path, source)?;
        Ok(path)
    }

    /// Claims the normalised form of a source-relative `path`, for assets
    /// written where they were found.
    pub fn plan_path(&mut self, path: &Path, source: &str) -> Result<PathBuf> {
        let rendered = slash_path(path);
        let path = normalize_output_path(&rendered, &rendered)?;
        self.claim(&path, source)?;
        Ok(path)
    }

    /// Claims `path` for `source`. Claiming a path again for the same
    /// source is a no-op.
    pub fn claim(&mut self, path: &Path, source: &str) -> Result<()> {
        match self.claims.get(path) {
            Some(owner) if owner == source => Ok(()),
            Some(owner) => Err(AssetFlowError::collision_error(
                path.to_path_buf(),
                owner.clone(),
                source,
            )),
            None => {
                _ = self.claims.insert(path.to_path_buf(), source.to_string());
                Ok(())
            }
        }
    }

    /// Number of claimed paths.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether nothing has been planned yet.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// What produced an output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSource {
    /// A source asset, by context-relative path.
    Asset(PathBuf),
    /// The script bundle of a chunk.
    ChunkScript(String),
    /// The extracted stylesheet of a chunk.
    ChunkStyle(String),
    /// A file added by a plugin.
    Plugin(String),
}

impl fmt::Display for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSource::Asset(path) => write!(f, "{}", slash_path(path)),
            OutputSource::ChunkScript(name) => write!(f, "chunk `{}` (script)", name),
            OutputSource::ChunkStyle(name) => write!(f, "chunk `{}` (style)", name),
            OutputSource::Plugin(name) => write!(f, "plugin `{}`", name),
        }
    }
}

/// One file of the build output.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// Path relative to the output directory.
    pub path: PathBuf,
    /// What produced it.
    pub source: OutputSource,
    /// Bytes to write.
    pub contents: Vec<u8>,
}

/// The ordered, in-memory output of one build.
///
/// Files can be appended and their contents edited, but never removed
/// or reordered.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    files: Vec<OutputFile>,
    index: HashMap<PathBuf, usize>,
}

impl Manifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file. A path already held by another source is a
    /// `CollisionError`; the same source replaces its own contents.
    pub fn push(&mut self, file: OutputFile) -> Result<()> {
        if let Some(&i) = self.index.get(&file.path) {
            let existing = &mut self.files[i];
            if existing.source != file.source {
                return Err(AssetFlowError::collision_error(
                    file.path,
                    existing.source.to_string(),
                    file.source.to_string(),
                ));
            }
            existing.contents = file.contents;
            return Ok(());
        }
        _ = self.index.insert(file.path.clone(), self.files.len());
        self.files.push(file);
        Ok(())
    }

    /// Looks a file up by output path.
    pub fn get(&self, path: &Path) -> Option<&OutputFile> {
        self.index.get(path).map(|&i| &self.files[i])
    }

    /// Mutable access to the contents of an existing file.
    pub fn contents_mut(&mut self, path: &Path) -> Option<&mut Vec<u8>> {
        match self.index.get(path) {
            Some(&i) => Some(&mut self.files[i].contents),
            None => None,
        }
    }

    /// Files in insertion order.
    pub fn files(&self) -> &[OutputFile] {
        &self.files
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Hash over every path and content, identifying this build.
    pub fn build_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for file in &self.files {
            _ = hasher.update(slash_path(&file.path).as_bytes());
            _ = hasher.update(&[0]);
            _ = hasher.update(&file.contents);
        }
        let mut hex = hasher.finalize().to_hex().to_string();
        hex.truncate(HASH_LENGTH);
        hex
    }

    /// Writes every file below `out_dir`, creating directories as
    /// needed. Returns the written paths.
    pub fn emit(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let target = out_dir.join(&file.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| AssetFlowError::io_error(parent.to_path_buf(), e))?;
            }
            fs::write(&target, &file.contents)
                .map_err(|e| AssetFlowError::io_error(target.clone(), e))?;
            debug!("Wrote {} ({} bytes)", target.display(), file.contents.len());
            written.push(target);
        }
        info!("Emitted {} files to {}", written.len(), out_dir.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn render(template: &str, path: &str, contents: &[u8]) -> Result<PathBuf> {
        NamingTemplate::parse(template)?.render(&NameVars::for_asset(Path::new(path), contents))
    }

    #[test]
    fn test_image_lands_in_images_dir() {
        let out = render("images/[name].[ext]", "src/images/logo.svg", b"<svg/>").unwrap();
        assert_eq!(out, PathBuf::from("images/logo.svg"));
    }

    #[test]
    fn test_font_name_template() {
        let out = render("fonts/[name].[ext]", "src/fonts/icon-font.svg", b"<svg/>").unwrap();
        assert_eq!(out, PathBuf::from("fonts/icon-font.svg"));
    }

    #[test]
    fn test_path_placeholder_keeps_directory() {
        let out = render("[path][name].[ext]", "src/images/a.png", b"").unwrap();
        assert_eq!(out, PathBuf::from("src/images/a.png"));
        let top = render("[path][name].[ext]", "a.png", b"").unwrap();
        assert_eq!(top, PathBuf::from("a.png"));
    }

    #[test]
    fn test_hash_placeholders() {
        let full = render("[name].[hash].[ext]", "a.png", b"abc").unwrap();
        let expected = content_hash(b"abc", HASH_LENGTH);
        assert_eq!(full, PathBuf::from(format!("a.{}.png", expected)));

        let short = render("[name].[contenthash:8].[ext]", "a.png", b"abc").unwrap();
        assert_eq!(short, PathBuf::from(format!("a.{}.png", &expected[..8])));
    }

    #[test]
    fn test_unknown_placeholder_is_config_error() {
        let err = NamingTemplate::parse("[name].[chunkhash].js").unwrap_err();
        assert!(matches!(err, AssetFlowError::ConfigError { .. }));
        assert!(NamingTemplate::parse("[name.js").is_err());
        assert!(NamingTemplate::parse("[hash:0].js").is_err());
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        assert!(render("../[name].[ext]", "a.png", b"").is_err());
        assert!(render("/etc/[name]", "a.png", b"").is_err());
        assert_eq!(
            render("images/../[name].[ext]", "a.png", b"").unwrap(),
            PathBuf::from("a.png")
        );
    }

    #[test]
    fn test_planner_rejects_distinct_sources_on_one_path() {
        let template = NamingTemplate::parse("images/[name].[ext]").unwrap();
        let mut planner = OutputPlanner::new();
        let a = Path::new("src/images/logo.svg");
        let b = Path::new("src/fonts/logo.svg");
        _ = planner.plan(&template, &NameVars::for_asset(a, b""), "src/images/logo.svg").unwrap();

        // Same source again is fine.
        _ = planner.plan(&template, &NameVars::for_asset(a, b""), "src/images/logo.svg").unwrap();

        let err = planner
            .plan(&template, &NameVars::for_asset(b, b""), "src/fonts/logo.svg")
            .unwrap_err();
        assert!(matches!(err, AssetFlowError::CollisionError { .. }));
        assert_eq!(planner.len(), 1);
    }

    #[test]
    fn test_planner_paths_unique_across_many_sources() {
        let template = NamingTemplate::parse("[path][name].[hash:6].[ext]").unwrap();
        let mut planner = OutputPlanner::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..50 {
            let path = PathBuf::from(format!("src/dir{}/file{}.png", i % 7, i));
            let contents = format!("contents {i}");
            let out = planner
                .plan(&template, &NameVars::for_asset(&path, contents.as_bytes()), &slash_path(&path))
                .unwrap();
            assert!(seen.insert(out));
        }
    }

    #[test]
    fn test_manifest_collision_and_edit() {
        let mut manifest = Manifest::new();
        manifest
            .push(OutputFile {
                path: PathBuf::from("index.html"),
                source: OutputSource::Plugin("html".into()),
                contents: b"<p>".to_vec(),
            })
            .unwrap();
        let err = manifest
            .push(OutputFile {
                path: PathBuf::from("index.html"),
                source: OutputSource::Asset(PathBuf::from("src/index.html")),
                contents: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, AssetFlowError::CollisionError { .. }));

        manifest
            .contents_mut(Path::new("index.html"))
            .unwrap()
            .extend_from_slice(b"</p>");
        assert_eq!(manifest.get(Path::new("index.html")).unwrap().contents, b"<p></p>");
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn test_build_hash_tracks_contents() {
        let mut a = Manifest::new();
        let file = |contents: &[u8]| OutputFile {
            path: PathBuf::from("js/main.bundle.js"),
            source: OutputSource::ChunkScript("main".into()),
            contents: contents.to_vec(),
        };
        a.push(file(b"one")).unwrap();
        let mut b = Manifest::new();
        b.push(file(b"two")).unwrap();
        assert_eq!(a.build_hash().len(), HASH_LENGTH);
        assert_ne!(a.build_hash(), b.build_hash());
    }

    #[test]
    fn test_emit_writes_nested_files() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::new();
        manifest
            .push(OutputFile {
                path: PathBuf::from("images/logo.svg"),
                source: OutputSource::Asset(PathBuf::from("src/images/logo.svg")),
                contents: b"<svg/>".to_vec(),
            })
            .unwrap();
        let written = manifest.emit(dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("images/logo.svg")]);
        assert_eq!(fs::read(dir.path().join("images/logo.svg")).unwrap(), b"<svg/>");
    }
}
