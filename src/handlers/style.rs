// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Stylesheet handlers
//!
//! CSS work is delegated: `grass` compiles Sass, `lightningcss` parses,
//! prefixes and minifies CSS. The handlers here only decide what to do
//! with the result:
//!
//! - `sass`: Sass/SCSS to CSS
//! - `postcss`: vendor prefixes and minification
//! - `css`: validation, `url()` rewriting, removal of bundled `@import`s
//! - `style`: CSS to a script injecting a `<style>` element
//! - `extract`: CSS to the chunk's extracted stylesheet, or `style` when
//!   extraction is disabled

use std::collections::HashMap;
use std::sync::OnceLock;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use regex::{Captures, Regex};

use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Handler;
use crate::graph::is_local_url;
use crate::handlers::{
    option_bool, option_str, require_string_option, ContentKind,
    HandlerContext, HandlerOptions, Transformed,
};

/// `sass` handler name.
pub const SASS: &str = "sass";
/// `postcss` handler name.
pub const POSTCSS: &str = "postcss";
/// `css` handler name.
pub const CSS: &str = "css";
/// `style` handler name.
pub const STYLE: &str = "style";
/// `extract` handler name.
pub const EXTRACT: &str = "extract";

/// Attribute marking `<style>` elements injected by bundles.
pub const STYLE_MARKER: &str = "data-assetflow-style";

/// Compiles Sass and SCSS with `grass`.
///
/// Files ending in `.sass` use the indented syntax. The asset's own
/// directory and any `include_paths` are searched for `@use`/`@import`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SassHandler;

impl Handler for SassHandler {
    fn name(&self) -> &str {
        SASS
    }

    fn validate(&self, options: &HandlerOptions) -> Result<()> {
        _ = option_bool(options, SASS, "minify", false)?;
        match options.get("include_paths") {
            None => Ok(()),
            Some(serde_json::Value::Array(items))
                if items.iter().all(serde_json::Value::is_string) =>
            {
                Ok(())
            }
            Some(other) => Err(AssetFlowError::config_error(
                format!(
                    "Option `include_paths` of handler `sass` must be a list of strings, got {}",
                    other
                ),
                None,
            )),
        }
    }

    fn apply(
        &self,
        input: Transformed,
        options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(SASS, ctx.asset, &[ContentKind::Style])?;
        let source = input.text(SASS, ctx.asset)?.to_string();

        let style = if option_bool(options, SASS, "minify", false)? {
            grass::OutputStyle::Compressed
        } else {
            grass::OutputStyle::Expanded
        };
        let indented = ctx
            .asset
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"));
        let syntax = if indented {
            grass::InputSyntax::Sass
        } else {
            grass::InputSyntax::Scss
        };

        let mut grass_options =
            grass::Options::default().style(style).input_syntax(syntax);
        if let Some(parent) = ctx.source.parent() {
            grass_options = grass_options.load_path(parent);
        }
        if let Some(serde_json::Value::Array(paths)) = options.get("include_paths") {
            for path in paths.iter().filter_map(serde_json::Value::as_str) {
                grass_options = grass_options.load_path(path);
            }
        }

        let css = grass::from_string(source, &grass_options).map_err(|e| {
            AssetFlowError::transform_error(
                SASS,
                ctx.asset.to_path_buf(),
                e.to_string(),
                None,
            )
        })?;
        Ok(Transformed::from_text(css, ContentKind::Style))
    }
}

/// Adds vendor prefixes and minifies CSS with `lightningcss`.
///
/// Options: `autoprefix` (default `true`), `minify` (default `true`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcssHandler;

impl Handler for PostcssHandler {
    fn name(&self) -> &str {
        POSTCSS
    }

    fn validate(&self, options: &HandlerOptions) -> Result<()> {
        _ = option_bool(options, POSTCSS, "autoprefix", true)?;
        _ = option_bool(options, POSTCSS, "minify", true)?;
        Ok(())
    }

    fn apply(
        &self,
        input: Transformed,
        options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(POSTCSS, ctx.asset, &[ContentKind::Style])?;
        let source = input.text(POSTCSS, ctx.asset)?;
        let autoprefix = option_bool(options, POSTCSS, "autoprefix", true)?;
        let minify = option_bool(options, POSTCSS, "minify", true)?;

        let css = process_css(source, &ctx.asset.display().to_string(), minify, autoprefix)
            .map_err(|message| {
                AssetFlowError::transform_error(
                    POSTCSS,
                    ctx.asset.to_path_buf(),
                    message,
                    None,
                )
            })?;
        Ok(Transformed::from_text(css, ContentKind::Style))
    }
}

/// Validates CSS, rewrites `url()` references to output URLs and drops
/// `@import`s of local stylesheets, which are bundled as modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssHandler;

impl Handler for CssHandler {
    fn name(&self) -> &str {
        CSS
    }

    fn apply(
        &self,
        input: Transformed,
        _options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(CSS, ctx.asset, &[ContentKind::Style])?;
        let source = input.text(CSS, ctx.asset)?;

        let without_imports = strip_local_imports(source);
        let rewritten = rewrite_urls(&without_imports, ctx.urls);

        _ = StyleSheet::parse(
            &rewritten,
            ParserOptions {
                filename: ctx.asset.display().to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| {
            AssetFlowError::transform_error(
                CSS,
                ctx.asset.to_path_buf(),
                e.to_string(),
                None,
            )
        })?;

        Ok(Transformed::from_text(rewritten, ContentKind::Style))
    }
}

/// Turns CSS into a script that appends it to the document head.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleHandler;

impl Handler for StyleHandler {
    fn name(&self) -> &str {
        STYLE
    }

    fn apply(
        &self,
        input: Transformed,
        _options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(STYLE, ctx.asset, &[ContentKind::Style])?;
        let css = input.text(STYLE, ctx.asset)?;
        let script = injection_script(css, &ctx.asset.to_string_lossy())
            .map_err(|e| {
                AssetFlowError::transform_error(
                    STYLE,
                    ctx.asset.to_path_buf(),
                    e.to_string(),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Transformed::from_text(script, ContentKind::Script))
    }
}

/// Marks CSS for extraction into the chunk stylesheet.
///
/// When extraction is disabled for the build the `fallback` handler
/// (only `style` is supported) is applied instead. `public_path`
/// overrides the URL prefix the `css` stage uses for this chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractHandler;

impl Handler for ExtractHandler {
    fn name(&self) -> &str {
        EXTRACT
    }

    fn validate(&self, options: &HandlerOptions) -> Result<()> {
        require_string_option(options, EXTRACT, "fallback")?;
        require_string_option(options, EXTRACT, "public_path")?;
        match option_str(options, "fallback") {
            None | Some(STYLE) | Some("style-loader") => Ok(()),
            Some(other) => Err(AssetFlowError::config_error(
                format!(
                    "Handler `extract` only supports `style` as fallback, got `{}`",
                    other
                ),
                None,
            )),
        }
    }

    fn apply(
        &self,
        input: Transformed,
        options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(EXTRACT, ctx.asset, &[ContentKind::Style])?;
        if ctx.extract {
            Ok(Transformed::new(input.contents, ContentKind::ExtractedStyle))
        } else {
            StyleHandler.apply(input, options, ctx)
        }
    }
}

/// Parses, optionally prefixes, and prints CSS.
fn process_css(
    source: &str,
    filename: &str,
    minify: bool,
    autoprefix: bool,
) -> std::result::Result<String, String> {
    let mut stylesheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| format!("CSS parse error: {}", e))?;

    let targets = if autoprefix {
        Targets::from(default_browser_targets())
    } else {
        Targets::default()
    };

    if minify || autoprefix {
        stylesheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| format!("CSS minify error: {}", e))?;
    }

    let output = stylesheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| format!("CSS print error: {}", e))?;
    Ok(output.code)
}

/// Browsers covered by vendor prefixing: the last few releases of the
/// major engines.
fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ios_saf: Some(13 << 16),
        ..Browsers::default()
    }
}

/// Builds the script that injects `css` as a `<style>` element.
pub fn injection_script(css: &str, id: &str) -> serde_json::Result<String> {
    let css_literal = serde_json::to_string(css)?;
    let id_literal = serde_json::to_string(id)?;
    Ok(format!(
        "(function () {{\n  var style = document.createElement('style');\n  \
         style.setAttribute('{marker}', {id});\n  \
         style.textContent = {css};\n  \
         document.head.appendChild(style);\n}})();\n",
        marker = STYLE_MARKER,
        id = id_literal,
        css = css_literal,
    ))
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#)
            .unwrap_or_else(|e| unreachable!("invalid url pattern: {e}"))
    })
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)['"]?\s*\)?[^;]*;"#)
            .unwrap_or_else(|e| unreachable!("invalid import pattern: {e}"))
    })
}

/// Replaces `url()` requests found in `urls` with their output URL.
/// Unknown requests (remote, data URIs) are left untouched.
fn rewrite_urls(css: &str, urls: &HashMap<String, String>) -> String {
    url_pattern()
        .replace_all(css, |caps: &Captures<'_>| {
            let request = caps[2].trim();
            let bare = request
                .split(['?', '#'])
                .next()
                .unwrap_or(request);
            match urls.get(request).or_else(|| urls.get(bare)) {
                Some(url) => format!("url({}{}{})", &caps[1], url, &caps[3]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn strip_local_imports(css: &str) -> String {
    import_pattern()
        .replace_all(css, |caps: &Captures<'_>| {
            if is_local_url(&caps[1]) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
