// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # HTML Page Plugin
//!
//! Renders a Handlebars template into the build's HTML page, injects
//! `<link>` and `<script>` tags for every chunk, and optionally minifies
//! the result with `minify-html`.
//!
//! ## Template data
//!
//! - `title`: the `title` option
//! - `scripts`, `styles`: chunk URLs in load order
//! - `mode`: `development` or `production`
//! - `hash`: the build hash
//!
//! Templates that place the tags themselves should set `inject = false`.

use std::fs;
use std::path::PathBuf;

use handlebars::Handlebars;
use log::debug;
use minify_html::{minify, Cfg};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Plugin;
use crate::output::{NameVars, NamingTemplate, OutputFile, OutputSource};
use crate::plugins::{bool_option, string_option, BuildState, Hook};

/// Plugin name.
pub const HTML: &str = "html";

/// Page written when no template is configured.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{{title}}</title>
  </head>
  <body>
    <div id="app"></div>
  </body>
</html>
"#;

/// Name the template is registered under.
const PAGE: &str = "page";

/// Renders the HTML page at [`Hook::BeforeEmit`].
#[derive(Debug, Clone)]
pub struct HtmlPlugin {
    title: String,
    template: Option<PathBuf>,
    filename: NamingTemplate,
    hash: bool,
    inject: bool,
    minify: bool,
}

impl HtmlPlugin {
    /// Reads the plugin from descriptor options.
    pub fn from_options(options: &JsonMap<String, JsonValue>) -> Result<Self> {
        let filename = string_option(HTML, options, "filename")?
            .unwrap_or_else(|| "index.html".to_string());
        let minify = match options.get("minify") {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Object(table)) => {
                bool_option(HTML, table, "collapse_whitespace", false)?
            }
            Some(other) => {
                return Err(AssetFlowError::config_error(
                    format!(
                        "Option `minify` of plugin `html` must be a boolean or a table, got {}",
                        other
                    ),
                    None,
                ))
            }
        };

        Ok(Self {
            title: string_option(HTML, options, "title")?
                .unwrap_or_else(|| "AssetFlow".to_string()),
            template: string_option(HTML, options, "template")?.map(PathBuf::from),
            filename: NamingTemplate::parse(&filename)?,
            hash: bool_option(HTML, options, "hash", false)?,
            inject: bool_option(HTML, options, "inject", true)?,
            minify,
        })
    }

    fn load_template(&self, state: &BuildState) -> Result<(String, String)> {
        let Some(relative) = &self.template else {
            return Ok(("<default>".to_string(), DEFAULT_TEMPLATE.to_string()));
        };
        let path = state.context().join(relative);
        let source = fs::read_to_string(&path).map_err(|e| {
            AssetFlowError::template_rendering_error(
                format!("Failed to read template file: {}", e),
                path.display().to_string(),
                Some(Box::new(e)),
            )
        })?;
        Ok((path.display().to_string(), source))
    }

    fn urls(&self, state: &BuildState) -> (Vec<String>, Vec<String>) {
        let suffix = match (self.hash, state.build_hash()) {
            (true, Some(hash)) => format!("?{}", hash),
            _ => String::new(),
        };
        let mut scripts = Vec::new();
        let mut styles = Vec::new();
        for files in state.chunk_files() {
            scripts.extend(files.scripts.iter().map(|u| format!("{}{}", u, suffix)));
            styles.extend(files.styles.iter().map(|u| format!("{}{}", u, suffix)));
        }
        (scripts, styles)
    }
}

impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        HTML
    }

    fn hooks(&self) -> &[Hook] {
        &[Hook::BeforeEmit]
    }

    fn apply(&self, _hook: Hook, state: &mut BuildState) -> Result<()> {
        let (template_name, template) = self.load_template(state)?;
        let (scripts, styles) = self.urls(state);
        let data = json!({
            "title": self.title,
            "scripts": scripts,
            "styles": styles,
            "mode": state.mode().as_str(),
            "hash": state.build_hash(),
        });

        let mut page = render_page(&template_name, &template, &data)?;
        if self.inject {
            page = inject_tags(&page, &scripts, &styles);
        }
        let contents = if self.minify {
            minify_page(&page)
        } else {
            page.into_bytes()
        };

        let stem = self.filename.as_str().rsplit('/').next().unwrap_or("index");
        let stem = stem.split('.').next().unwrap_or("index");
        let path = self
            .filename
            .render(&NameVars::for_chunk(stem, "html", &contents))?;
        debug!("Rendered {} from {}", path.display(), template_name);

        state.manifest_mut()?.push(OutputFile {
            path,
            source: OutputSource::Plugin(HTML.to_string()),
            contents,
        })
    }
}

fn render_page(name: &str, template: &str, data: &JsonValue) -> Result<String> {
    let mut engine = Handlebars::new();
    engine.register_escape_fn(handlebars::html_escape);
    engine.register_template_string(PAGE, template).map_err(|e| {
        AssetFlowError::template_rendering_error(
            format!("Failed to register template: {}", e),
            name.to_string(),
            Some(Box::new(e)),
        )
    })?;
    engine.render(PAGE, data).map_err(|e| {
        AssetFlowError::template_rendering_error(
            format!("Failed to render template: {}", e),
            name.to_string(),
            Some(Box::new(e)),
        )
    })
}

/// Places stylesheet links before `</head>` and scripts before
/// `</body>`, falling back to the start and end of the page.
fn inject_tags(page: &str, scripts: &[String], styles: &[String]) -> String {
    let links: String = styles
        .iter()
        .map(|href| {
            format!(
                "<link href=\"{}\" rel=\"stylesheet\">",
                handlebars::html_escape(href)
            )
        })
        .collect();
    let tags: String = scripts
        .iter()
        .map(|src| {
            format!(
                "<script type=\"text/javascript\" src=\"{}\"></script>",
                handlebars::html_escape(src)
            )
        })
        .collect();

    let mut out = page.to_string();
    match out.rfind("</head>") {
        Some(i) => out.insert_str(i, &links),
        None => out.insert_str(0, &links),
    }
    match out.rfind("</body>") {
        Some(i) => out.insert_str(i, &tags),
        None => out.push_str(&tags),
    }
    out
}

fn minify_page(page: &str) -> Vec<u8> {
    let cfg = Cfg {
        keep_closing_tags: true,
        keep_html_and_head_opening_tags: true,
        minify_css: true,
        minify_js: true,
        ..Cfg::default()
    };
    minify(page.as_bytes(), &cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Mode;
    use crate::plugins::ChunkFiles;
    use tempfile::TempDir;

    fn state(context: &std::path::Path) -> BuildState {
        let mut state = BuildState::new(Mode::Production, context, "");
        state.build_hash = Some("0123456789abcdef0123".into());
        state.chunk_files = vec![
            ChunkFiles {
                chunk: "vendor".into(),
                scripts: vec!["js/vendor.bundle.js".into()],
                styles: Vec::new(),
            },
            ChunkFiles {
                chunk: "main".into(),
                scripts: vec!["js/main.bundle.js".into()],
                styles: vec!["css/main.css".into()],
            },
        ];
        state.enter(Hook::BeforeEmit, HTML);
        state
    }

    fn page(state: &BuildState) -> String {
        let file = state.manifest().get(std::path::Path::new("index.html")).unwrap();
        String::from_utf8(file.contents.clone()).unwrap()
    }

    #[test]
    fn test_renders_template_and_injects_tags_in_chunk_order() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/index.hbs"),
            "<html><head><title>{{title}}</title></head><body>{{mode}}</body></html>",
        )
        .unwrap();

        let mut options = JsonMap::new();
        _ = options.insert("title".into(), "Starter".into());
        _ = options.insert("template".into(), "src/index.hbs".into());
        _ = options.insert("hash".into(), true.into());
        let plugin = HtmlPlugin::from_options(&options).unwrap();

        let mut state = state(dir.path());
        plugin.apply(Hook::BeforeEmit, &mut state).unwrap();
        let html = page(&state);

        assert!(html.contains("<title>Starter</title>"));
        assert!(html.contains("production"));
        assert!(html.contains(
            "<link href=\"css/main.css?0123456789abcdef0123\" rel=\"stylesheet\"></head>"
        ));
        let vendor = html.find("js/vendor.bundle.js").unwrap();
        let main = html.find("js/main.bundle.js").unwrap();
        assert!(vendor < main);
    }

    #[test]
    fn test_default_template_without_injection() {
        let dir = TempDir::new().unwrap();
        let mut options = JsonMap::new();
        _ = options.insert("inject".into(), false.into());
        let plugin = HtmlPlugin::from_options(&options).unwrap();
        let mut state = state(dir.path());
        plugin.apply(Hook::BeforeEmit, &mut state).unwrap();
        let html = page(&state);
        assert!(html.contains("<title>AssetFlow</title>"));
        assert!(!html.contains("<script"));
    }

    #[test]
    fn test_minify_collapses_whitespace() {
        let dir = TempDir::new().unwrap();
        let mut options = JsonMap::new();
        _ = options.insert("minify".into(), json!({ "collapse_whitespace": true }));
        let plugin = HtmlPlugin::from_options(&options).unwrap();
        let mut state = state(dir.path());
        plugin.apply(Hook::BeforeEmit, &mut state).unwrap();
        assert!(!page(&state).contains("\n    "));
    }

    #[test]
    fn test_missing_template_is_template_error() {
        let dir = TempDir::new().unwrap();
        let mut options = JsonMap::new();
        _ = options.insert("template".into(), "src/missing.hbs".into());
        let plugin = HtmlPlugin::from_options(&options).unwrap();
        let mut state = state(dir.path());
        let err = plugin.apply(Hook::BeforeEmit, &mut state).unwrap_err();
        assert!(matches!(err, AssetFlowError::TemplateRenderingError { .. }));
    }

    #[test]
    fn test_invalid_template_syntax() {
        assert!(render_page("t", "{{#if}}", &json!({})).is_err());
    }
}
