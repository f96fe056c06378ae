// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Handlers
//!
//! A handler is one transform stage of an asset rule. A rule's chain is
//! declared in "use" order and executed in reverse: the last declared
//! handler receives the raw file, and each handler feeds its output to
//! the one declared before it.
//!
//! ## Built-in handlers
//!
//! - [`script::ScriptHandler`] (`script`)
//! - [`style::SassHandler`] (`sass`), [`style::PostcssHandler`]
//!   (`postcss`), [`style::CssHandler`] (`css`), [`style::StyleHandler`]
//!   (`style`), [`style::ExtractHandler`] (`extract`)
//! - [`file::FileHandler`] (`file`), [`file::ImageHandler`] (`image`)
//!
//! ## Descriptors
//!
//! Handlers are named in configuration either as loader query strings
//! (`file?name=[name].[ext]&output_path=images/`) or as tables
//! (`{ name = "postcss", options = { minify = true } }`). Option keys
//! written in camelCase are normalised to snake_case.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::path::Path;
use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::config::Mode;
use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Handler;

/// Script handler.
pub mod script;

/// Stylesheet handlers.
pub mod style;

/// File emission and image handlers.
pub mod file;

/// Options attached to a handler descriptor.
pub type HandlerOptions = JsonMap<String, JsonValue>;

/// What a piece of content currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// JavaScript, bundled into the chunk.
    Script,
    /// CSS or a CSS preprocessor language.
    Style,
    /// CSS destined for the chunk's extracted stylesheet.
    ExtractedStyle,
    /// Anything else: images, fonts, documents.
    Binary,
}

impl ContentKind {
    /// Initial kind of a raw file, derived from its extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "mjs" | "cjs" | "jsx" => ContentKind::Script,
            "css" | "scss" | "sass" => ContentKind::Style,
            _ => ContentKind::Binary,
        }
    }
}

/// Request to emit content as a standalone output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitRequest {
    /// Naming template, relative to the output directory.
    pub template: String,
}

/// Content flowing through a handler chain.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// Current bytes.
    pub contents: Vec<u8>,
    /// Current kind.
    pub kind: ContentKind,
    /// Set by handlers that turn the asset into its own output file.
    pub emit: Option<EmitRequest>,
}

impl Transformed {
    /// Wraps raw bytes.
    pub fn new(contents: Vec<u8>, kind: ContentKind) -> Self {
        Self {
            contents,
            kind,
            emit: None,
        }
    }

    /// Wraps text.
    pub fn from_text(text: String, kind: ContentKind) -> Self {
        Self::new(text.into_bytes(), kind)
    }

    /// Borrows the contents as UTF-8, failing as `handler` otherwise.
    pub fn text(&self, handler: &str, asset: &Path) -> Result<&str> {
        std::str::from_utf8(&self.contents).map_err(|e| {
            AssetFlowError::transform_error(
                handler,
                asset.to_path_buf(),
                "content is not valid UTF-8",
                Some(Box::new(e)),
            )
        })
    }

    /// Fails as `handler` unless the content is one of `accepted`.
    pub fn expect_kind(
        &self,
        handler: &str,
        asset: &Path,
        accepted: &[ContentKind],
    ) -> Result<()> {
        if accepted.contains(&self.kind) {
            Ok(())
        } else {
            Err(AssetFlowError::transform_error(
                handler,
                asset.to_path_buf(),
                format!("cannot handle {:?} content", self.kind),
                None,
            ))
        }
    }
}

/// Per-asset information handed to every stage of a chain.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    /// Context-relative path of the asset, used in errors and ids.
    pub asset: &'a Path,
    /// Absolute (context-joined) path of the asset on disk.
    pub source: &'a Path,
    /// Active build variant.
    pub mode: Mode,
    /// Whether stylesheet extraction is enabled for this build.
    pub extract: bool,
    /// Output URLs of the files this asset references, keyed by the
    /// request string as written in the source.
    pub urls: &'a HashMap<String, String>,
}

/// A handler name plus its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HandlerSpec", into = "HandlerSpec")]
pub struct HandlerDescriptor {
    /// Registered handler name.
    pub name: String,
    /// Handler options.
    pub options: HandlerOptions,
}

impl HandlerDescriptor {
    /// Creates a descriptor without options.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            options: HandlerOptions::new(),
        }
    }

    /// Parses the loader query form `name?key=value&flag`.
    ///
    /// `true`, `false` and integers are typed; a key without `=` is
    /// `true`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, query) = match spec.split_once('?') {
            Some((name, query)) => (name.trim(), Some(query)),
            None => (spec.trim(), None),
        };
        if name.is_empty() {
            return Err(AssetFlowError::config_error(
                format!("Handler descriptor `{}` has no name", spec),
                None,
            ));
        }

        let mut options = HandlerOptions::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key, typed_value(value)),
                None => (pair, JsonValue::Bool(true)),
            };
            _ = options.insert(to_snake_case(key), value);
        }

        Ok(Self {
            name: name.to_string(),
            options,
        })
    }

    /// Reads a string option.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        option_str(&self.options, key)
    }
}

/// Serialized forms of a [`HandlerDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandlerSpec {
    /// `"name?key=value"`
    Query(String),
    /// `{ name = "...", options = { ... } }`
    Table {
        /// Handler name.
        name: String,
        /// Handler options.
        #[serde(default)]
        options: HandlerOptions,
    },
}

impl TryFrom<HandlerSpec> for HandlerDescriptor {
    type Error = AssetFlowError;

    fn try_from(spec: HandlerSpec) -> Result<Self> {
        match spec {
            HandlerSpec::Query(text) => HandlerDescriptor::parse(&text),
            HandlerSpec::Table { name, options } => Ok(HandlerDescriptor {
                name,
                options: options
                    .into_iter()
                    .map(|(k, v)| (to_snake_case(&k), v))
                    .collect(),
            }),
        }
    }
}

impl From<HandlerDescriptor> for HandlerSpec {
    fn from(descriptor: HandlerDescriptor) -> Self {
        HandlerSpec::Table {
            name: descriptor.name,
            options: descriptor.options,
        }
    }
}

/// Reads a string option.
pub fn option_str<'a>(options: &'a HandlerOptions, key: &str) -> Option<&'a str> {
    options.get(key).and_then(JsonValue::as_str)
}

/// Reads a boolean option, failing when it has another type.
pub fn option_bool(
    options: &HandlerOptions,
    handler: &str,
    key: &str,
    default: bool,
) -> Result<bool> {
    match options.get(key) {
        None => Ok(default),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(other) => Err(AssetFlowError::config_error(
            format!(
                "Option `{}` of handler `{}` must be a boolean, got {}",
                key, handler, other
            ),
            None,
        )),
    }
}

/// Fails unless the option is absent or a string.
pub fn require_string_option(
    options: &HandlerOptions,
    handler: &str,
    key: &str,
) -> Result<()> {
    match options.get(key) {
        None | Some(JsonValue::String(_)) => Ok(()),
        Some(other) => Err(AssetFlowError::config_error(
            format!(
                "Option `{}` of handler `{}` must be a string, got {}",
                key, handler, other
            ),
            None,
        )),
    }
}

fn typed_value(raw: &str) -> JsonValue {
    match raw {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or_else(|_| JsonValue::String(raw.to_string())),
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// A resolved stage: descriptor plus handler implementation.
#[derive(Debug, Clone)]
pub struct Stage {
    descriptor: HandlerDescriptor,
    handler: Arc<dyn Handler>,
}

impl Stage {
    /// The stage's descriptor.
    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }
}

/// An executable handler chain.
#[derive(Debug, Clone, Default)]
pub struct HandlerChain {
    stages: Vec<Stage>,
}

impl HandlerChain {
    /// Stages in declaration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Handler names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .map(|s| s.descriptor.name.as_str())
            .collect()
    }

    /// URL prefix requested by an `extract` stage, when extraction is on.
    pub fn public_path_override(&self, extract: bool) -> Option<&str> {
        if !extract {
            return None;
        }
        self.stages
            .iter()
            .find(|s| s.descriptor.name == style::EXTRACT)
            .and_then(|s| s.descriptor.option_str("public_path"))
    }

    /// Runs the stages last-declared first, threading the content
    /// through. The first failure aborts the chain as a
    /// `TransformError` naming the handler and the asset.
    pub fn execute(
        &self,
        input: Transformed,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        self.stages.iter().rev().try_fold(input, |content, stage| {
            trace!(
                "Applying `{}` to {}",
                stage.descriptor.name,
                ctx.asset.display()
            );
            stage
                .handler
                .apply(content, &stage.descriptor.options, ctx)
                .map_err(|e| match e {
                    AssetFlowError::TransformError { .. } => e,
                    other => AssetFlowError::transform_error(
                        stage.descriptor.name.clone(),
                        ctx.asset.to_path_buf(),
                        other.to_string(),
                        Some(Box::new(other)),
                    ),
                })
        })
    }
}

/// Named handler implementations available to rule chains.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in handler.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(script::ScriptHandler);
        registry.register(style::SassHandler);
        registry.register(style::PostcssHandler);
        registry.register(style::CssHandler);
        registry.register(style::StyleHandler);
        registry.register(style::ExtractHandler);
        registry.register(file::FileHandler);
        registry.register(file::ImageHandler);
        registry
    }

    /// Registers a handler under its own name, replacing any previous
    /// handler of that name.
    pub fn register<H: Handler + 'static>(&mut self, handler: H) {
        let name = handler.name().to_string();
        _ = self.handlers.insert(name, Arc::new(handler));
    }

    /// Looks a handler up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Resolves descriptors into an executable chain, validating names
    /// and options.
    pub fn chain(&self, descriptors: &[HandlerDescriptor]) -> Result<HandlerChain> {
        let stages = descriptors
            .iter()
            .map(|descriptor| {
                let handler = self.get(&descriptor.name).ok_or_else(|| {
                    AssetFlowError::config_error(
                        format!("Unknown handler `{}`", descriptor.name),
                        None,
                    )
                })?;
                handler.validate(&descriptor.options)?;
                Ok(Stage {
                    descriptor: descriptor.clone(),
                    handler,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(HandlerChain { stages })
    }
}
