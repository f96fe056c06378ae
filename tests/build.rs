// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fs;
use std::path::Path;

use assetflow::core::config::ConfigFile;
use assetflow::{AssetFlow, AssetFlowError, BuildConfig, ConfigBuilder, Mode};
use tempfile::TempDir;

const CONFIG: &str = r#"
[entries]
main = "src/js/index.js"

[output]
path = "public"
filename = "js/[name].[hash:8].js"
public_path = "/static/"
fallthrough = "error"

[[rules]]
test = '\.js$'
use = ["script"]

[[rules]]
test = '\.scss$'
use = ["style", "css", "sass"]
production = ["extract?public_path=/static/", "css", "postcss?minify=true", "sass"]

[[rules]]
test = '\.(png|svg)$'
exclude = ['fonts?']
use = ["file?name=[name].[hash:6].[ext]&output_path=images/", "image"]

[[rules]]
test = '\.(svg|woff2?)$'
exclude = ['images?']
use = ["file?name=fonts/[name].[ext]"]

[[plugins]]
name = "extract-css"
enabled_in = ["production"]

[[plugins]]
name = "html"
options = { title = "Fixture" }
"#;

fn write(root: &Path, path: &str, contents: &str) {
    let target = root.join(path);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(target, contents).unwrap();
}

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "assetflow.toml", CONFIG);
    write(root, "src/js/index.js", "import '../scss/app.scss';\nconsole.log('app');\n");
    write(
        root,
        "src/scss/app.scss",
        ".logo { background: url(../images/logo.svg); }\n\
         @font-face { font-family: Icons; src: url(../fonts/icon-font.svg); }\n",
    );
    write(root, "src/images/logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>");
    write(root, "src/fonts/icon-font.svg", "<svg><defs><font/></defs></svg>");
    dir
}

fn build(dir: &TempDir, mode: Mode) -> assetflow::Result<assetflow::BuildReport> {
    let config = ConfigBuilder::new()
        .with_file(dir.path().join("assetflow.toml"))
        .with_mode(mode)
        .build()?;
    AssetFlow::new(config)?.build()
}

fn files_under(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(next) = stack.pop() {
        for entry in fs::read_dir(next).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                found.push(
                    path.strip_prefix(dir)
                        .unwrap()
                        .to_string_lossy()
                        .replace('\\', "/"),
                );
            }
        }
    }
    found.sort();
    found
}

#[test]
fn images_and_fonts_are_told_apart_by_exclusions() {
    let dir = fixture();
    _ = build(&dir, Mode::Development).unwrap();
    let files = files_under(&dir.path().join("public"));

    assert!(files.contains(&"fonts/icon-font.svg".to_string()));
    let logo: Vec<_> = files.iter().filter(|f| f.starts_with("images/logo.")).collect();
    assert_eq!(logo.len(), 1);
    assert_eq!(logo[0].len(), "images/logo.123456.svg".len());
    assert!(files.iter().any(|f| f.starts_with("js/main.") && f.ends_with(".js")));
    assert!(files.contains(&"index.html".to_string()));
}

#[test]
fn production_build_links_extracted_stylesheet() {
    let dir = fixture();
    _ = build(&dir, Mode::Production).unwrap();
    let out = dir.path().join("public");

    let css = fs::read_to_string(out.join("css/main.css")).unwrap();
    assert!(css.contains("/static/images/logo."));
    assert!(css.contains("/static/fonts/icon-font.svg"));

    let html = fs::read_to_string(out.join("index.html")).unwrap();
    assert!(html.contains("<title>Fixture</title>"));
    assert!(html.contains("/static/css/main.css"));
    assert!(html.contains("/static/js/main."));
}

#[test]
fn content_hash_changes_with_content() {
    let dir = fixture();
    let first = build(&dir, Mode::Development).unwrap();
    write(dir.path(), "src/js/index.js", "import '../scss/app.scss';\nconsole.log('v2');\n");
    let second = build(&dir, Mode::Development).unwrap();
    assert_ne!(first.hash, second.hash);

    let bundles: Vec<_> = files_under(&dir.path().join("public"))
        .into_iter()
        .filter(|f| f.starts_with("js/main."))
        .collect();
    assert_eq!(bundles.len(), 2);
}

#[test]
fn unmatched_file_fails_under_error_policy() {
    let dir = fixture();
    write(dir.path(), "src/js/data.txt", "plain");
    write(dir.path(), "src/js/index.js", "require('./data.txt');\n");
    let err = build(&dir, Mode::Development).unwrap_err();
    assert!(matches!(err, AssetFlowError::ConfigError { .. }));
    assert!(!dir.path().join("public").exists());
}

#[test]
fn failing_handler_writes_nothing() {
    let dir = fixture();
    write(dir.path(), "src/images/logo.svg", "GIF89a, not an svg");
    let err = build(&dir, Mode::Development).unwrap_err();
    assert!(
        matches!(err, AssetFlowError::TransformError { ref handler, .. } if handler == "image")
    );
    assert!(!dir.path().join("public").exists());
}

#[test]
fn missing_entry_is_named_in_error() {
    let dir = fixture();
    let mut file = ConfigFile::parse(CONFIG, None).unwrap();
    _ = file
        .entries
        .insert("missing".into(), "src/js/absent.js".into());
    let config = BuildConfig::resolve(file, Mode::Development, dir.path(), None).unwrap();
    match AssetFlow::new(config).unwrap().build().unwrap_err() {
        AssetFlowError::ResolutionError { name, .. } => assert_eq!(name, "missing"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn development_and_production_styles_are_equivalent() {
    let dir = fixture();
    write(
        dir.path(),
        "src/scss/app.scss",
        "$c: red;\n.a { color: $c; }\n",
    );
    _ = build(&dir, Mode::Production).unwrap();
    let extracted = fs::read_to_string(dir.path().join("public/css/main.css")).unwrap();
    assert!(extracted.contains(".a{color:red}") || extracted.contains(".a{color:red;}"));

    let dev = TempDir::new().unwrap();
    write(dev.path(), "assetflow.toml", CONFIG);
    write(dev.path(), "src/js/index.js", "import '../scss/app.scss';\n");
    write(dev.path(), "src/scss/app.scss", "$c: red;\n.a { color: $c; }\n");
    _ = build(&dev, Mode::Development).unwrap();
    let bundle = files_under(&dev.path().join("public"))
        .into_iter()
        .find(|f| f.starts_with("js/main."))
        .unwrap();
    let script = fs::read_to_string(dev.path().join("public").join(bundle)).unwrap();
    // The injected CSS is a JSON string literal.
    let squashed: String = script
        .replace("\\n", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    assert!(squashed.contains(".a{color:red"));
}
