// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The `script` handler: normalises script sources before bundling and
//! rejects sources that do not parse as JavaScript modules.

use swc_common::{sync::Lrc, FileName, SourceMap, Spanned};
use swc_ecma_ast::EsVersion;
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};

use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Handler;
use crate::handlers::{
    option_bool, ContentKind, HandlerContext, HandlerOptions, Transformed,
};

/// Handler name.
pub const SCRIPT: &str = "script";

/// Validates UTF-8, normalises line endings and (unless `check = false`)
/// parses the source to reject syntax errors before bundling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptHandler;

impl Handler for ScriptHandler {
    fn name(&self) -> &str {
        SCRIPT
    }

    fn validate(&self, options: &HandlerOptions) -> Result<()> {
        _ = option_bool(options, SCRIPT, "check", true)?;
        Ok(())
    }

    fn apply(
        &self,
        input: Transformed,
        options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(SCRIPT, ctx.asset, &[ContentKind::Script])?;
        let mut text = input.text(SCRIPT, ctx.asset)?.replace("\r\n", "\n");

        if option_bool(options, SCRIPT, "check", true)? {
            let file_name = ctx
                .asset
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("input.js");
            check_syntax(file_name, &text).map_err(|message| {
                AssetFlowError::transform_error(
                    SCRIPT,
                    ctx.asset.to_path_buf(),
                    message,
                    None,
                )
            })?;
        }

        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(Transformed::from_text(text, ContentKind::Script))
    }
}

/// Parses `source` as an ES module with JSX enabled, returning the first
/// syntax error with its line.
fn check_syntax(file_name: &str, source: &str) -> std::result::Result<(), String> {
    let cm: Lrc<SourceMap> = Lrc::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(file_name.to_string())),
        source.to_string(),
    );
    let syntax = Syntax::Es(EsSyntax {
        jsx: true,
        ..Default::default()
    });
    let lexer = Lexer::new(syntax, EsVersion::EsNext, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let describe = |e: &swc_ecma_parser::error::Error| {
        let line = cm.lookup_char_pos(e.span().lo).line;
        format!("syntax error on line {}: {}", line, e.kind().msg())
    };

    let parsed = parser.parse_module();
    if let Some(recovered) = parser.take_errors().first() {
        return Err(describe(recovered));
    }
    parsed.map(|_| ()).map_err(|e| describe(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Mode;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn apply(source: &str) -> Result<Transformed> {
        let urls = HashMap::new();
        let asset = PathBuf::from("src/js/index.js");
        let ctx = HandlerContext {
            asset: &asset,
            source: Path::new("/project/src/js/index.js"),
            mode: Mode::Development,
            extract: false,
            urls: &urls,
        };
        ScriptHandler.apply(
            Transformed::from_text(source.to_string(), ContentKind::Script),
            &HandlerOptions::new(),
            &ctx,
        )
    }

    #[test]
    fn test_normalises_line_endings() {
        let out = apply("const a = 1;\r\nconsole.log(a);").unwrap();
        assert_eq!(out.contents, b"const a = 1;\nconsole.log(a);\n");
        assert_eq!(out.kind, ContentKind::Script);
    }

    #[test]
    fn test_brackets_in_strings_comments_and_regex_are_ignored() {
        let source = r#"
            // a stray ) in a comment
            /* and { here */
            const s = "(" + '[' + `${"}"}`;
            const re = /[(]+/g;
            if (s.match(re)) { console.log(s); }
        "#;
        assert!(apply(source).is_ok());
    }

    #[test]
    fn test_regex_literals_after_keywords_and_parens() {
        let source = "function f(s) {\n  return /[(]/.test(s);\n}\n\
                      const t = typeof /x/;\n\
                      if (f('(')) /[{]/.test('{');\n\
                      export default f;\n";
        assert!(apply(source).is_ok());
    }

    #[test]
    fn test_unbalanced_source_is_transform_error() {
        let err = apply("function main() {\n  return 1;\n").unwrap_err();
        match err {
            AssetFlowError::TransformError { handler, message, .. } => {
                assert_eq!(handler, "script");
                assert!(message.starts_with("syntax error on line"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_division_is_not_a_regex() {
        assert!(apply("const half = (a + b) / 2; const q = x / (y);").is_ok());
    }

    #[test]
    fn test_check_can_be_disabled() {
        let urls = HashMap::new();
        let asset = PathBuf::from("src/js/broken.js");
        let ctx = HandlerContext {
            asset: &asset,
            source: &asset,
            mode: Mode::Development,
            extract: false,
            urls: &urls,
        };
        let mut options = HandlerOptions::new();
        _ = options.insert("check".into(), false.into());
        let input = Transformed::from_text("if (".into(), ContentKind::Script);
        assert!(ScriptHandler.apply(input, &options, &ctx).is_ok());
    }

    #[test]
    fn test_rejects_non_script_content() {
        let urls = HashMap::new();
        let asset = PathBuf::from("src/a.css");
        let ctx = HandlerContext {
            asset: &asset,
            source: &asset,
            mode: Mode::Development,
            extract: false,
            urls: &urls,
        };
        let input = Transformed::from_text("a{}".into(), ContentKind::Style);
        assert!(ScriptHandler.apply(input, &HandlerOptions::new(), &ctx).is_err());
    }
}
