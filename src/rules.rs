// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Rule Matching
//!
//! An asset is matched against an ordered list of [`AssetRule`]s. The
//! first rule whose exclusion patterns do not match and whose test
//! pattern does is selected; later rules are never consulted. There is
//! no specificity scoring, so overlapping rules (fonts and images both
//! claiming `.svg`) are told apart only by their exclusion lists.
//!
//! When no rule matches, [`RuleSet::select`] returns the configured
//! [`Fallthrough`] policy instead of silently copying the asset.

use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::core::error::{AssetFlowError, Result};
use crate::handlers::HandlerDescriptor;

/// A compiled regular expression that remembers its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles `source`; invalid expressions are configuration errors.
    pub fn new(source: &str, case_insensitive: bool) -> Result<Self> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| {
                AssetFlowError::config_error(
                    format!("Invalid rule pattern `{}`: {}", source, e),
                    None,
                )
            })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Tests the pattern against a `/`-separated path.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The expression as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

/// A (match pattern, exclusion patterns, handler chain) triple.
#[derive(Debug, Clone)]
pub struct AssetRule {
    test: Pattern,
    exclude: Vec<Pattern>,
    chain: Vec<HandlerDescriptor>,
}

impl AssetRule {
    /// Creates a rule.
    pub fn new(
        test: Pattern,
        exclude: Vec<Pattern>,
        chain: Vec<HandlerDescriptor>,
    ) -> Self {
        Self {
            test,
            exclude,
            chain,
        }
    }

    /// Exclusions are checked before the test pattern.
    pub fn matches(&self, path: &str) -> bool {
        if self.exclude.iter().any(|p| p.is_match(path)) {
            return false;
        }
        self.test.is_match(path)
    }

    /// The test pattern.
    pub fn test(&self) -> &Pattern {
        &self.test
    }

    /// The exclusion patterns.
    pub fn exclude(&self) -> &[Pattern] {
        &self.exclude
    }

    /// Handler descriptors in declaration order.
    pub fn chain(&self) -> &[HandlerDescriptor] {
        &self.chain
    }
}

/// What happens to an asset that no rule matches.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Fallthrough {
    /// Copy the asset unmodified to the same relative output path.
    Copy,
    /// Copy it and log a warning.
    #[default]
    Warn,
    /// Fail the build.
    Error,
}

impl FromStr for Fallthrough {
    type Err = AssetFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "copy" => Ok(Fallthrough::Copy),
            "warn" => Ok(Fallthrough::Warn),
            "error" => Ok(Fallthrough::Error),
            other => Err(AssetFlowError::config_error(
                format!(
                    "Unknown fallthrough policy '{}', expected copy, warn or error",
                    other
                ),
                None,
            )),
        }
    }
}

/// Outcome of rule selection for one asset.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    /// The first satisfying rule and its position in the list.
    Rule {
        /// Zero-based declaration index.
        index: usize,
        /// The selected rule.
        rule: &'a AssetRule,
    },
    /// No rule matched.
    Fallthrough(Fallthrough),
}

impl Selection<'_> {
    /// The declaration index of the selected rule, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Selection::Rule { index, .. } => Some(*index),
            Selection::Fallthrough(_) => None,
        }
    }
}

/// The ordered rule list plus its fallthrough policy.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<AssetRule>,
    fallthrough: Fallthrough,
}

impl RuleSet {
    /// Creates a rule set; `rules` order is authoritative.
    pub fn new(rules: Vec<AssetRule>, fallthrough: Fallthrough) -> Self {
        Self { rules, fallthrough }
    }

    /// Returns the first rule satisfying match-and-not-excluded.
    pub fn select(&self, path: &str) -> Selection<'_> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(path))
            .map_or(Selection::Fallthrough(self.fallthrough), |(index, rule)| {
                Selection::Rule { index, rule }
            })
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[AssetRule] {
        &self.rules
    }

    /// The policy applied when nothing matches.
    pub fn fallthrough(&self) -> Fallthrough {
        self.fallthrough
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(test: &str, ci: bool, exclude: &[&str], handler: &str) -> AssetRule {
        AssetRule::new(
            Pattern::new(test, ci).unwrap(),
            exclude.iter().map(|p| Pattern::new(p, false).unwrap()).collect(),
            vec![HandlerDescriptor::parse(handler).unwrap()],
        )
    }

    fn starter_like() -> RuleSet {
        RuleSet::new(
            vec![
                rule(r"\.js$", false, &["(node_modules|bower_components)"], "script"),
                rule(r"\.css$", false, &[], "css"),
                rule(r"\.(jpe?g|png|gif|svg)$", true, &["fonts?"], "image"),
                rule(
                    r"\.(ttf|otf|eot|svg|woff2?)(\?[a-z0-9]+)?$",
                    false,
                    &["(images?|img)"],
                    "file",
                ),
            ],
            Fallthrough::Warn,
        )
    }

    #[test]
    fn test_image_rule_selected_for_svg_outside_fonts() {
        let rules = starter_like();
        assert_eq!(rules.select("src/images/logo.svg").index(), Some(2));
    }

    #[test]
    fn test_font_rule_selected_for_svg_under_fonts() {
        let rules = starter_like();
        assert_eq!(rules.select("src/fonts/icon-font.svg").index(), Some(3));
    }

    #[test]
    fn test_case_insensitive_test_pattern() {
        let rules = starter_like();
        assert_eq!(rules.select("src/images/PHOTO.JPG").index(), Some(2));
    }

    #[test]
    fn test_exclusion_checked_before_test() {
        let rules = starter_like();
        assert!(matches!(
            rules.select("node_modules/lib/index.js"),
            Selection::Fallthrough(Fallthrough::Warn)
        ));
    }

    #[test]
    fn test_first_match_wins() {
        let rules = RuleSet::new(
            vec![rule(r"\.svg$", false, &[], "file"), rule(r"logo", false, &[], "image")],
            Fallthrough::Copy,
        );
        match rules.select("logo.svg") {
            Selection::Rule { index, rule } => {
                assert_eq!(index, 0);
                assert_eq!(rule.chain()[0].name, "file");
            }
            Selection::Fallthrough(_) => panic!("expected a rule"),
        }
    }

    #[test]
    fn test_selection_is_first_satisfying_rule_for_many_paths() {
        let rules = starter_like();
        let paths = [
            "src/js/index.js",
            "src/css/main.css",
            "src/images/a.png",
            "src/img/b.woff",
            "src/fonts/c.woff2",
            "src/fonts/d.png",
            "src/readme.txt",
        ];
        for path in paths {
            let expected = rules.rules().iter().position(|r| r.matches(path));
            assert_eq!(rules.select(path).index(), expected, "{path}");
        }
    }

    #[test]
    fn test_file_matching_neither_rule_falls_through() {
        let rules = starter_like();
        // An image under a fonts directory is excluded from the image
        // rule and has no font extension.
        assert!(rules.select("src/fonts/preview.png").index().is_none());
    }

    #[test]
    fn test_fallthrough_parse() {
        assert_eq!("error".parse::<Fallthrough>().unwrap(), Fallthrough::Error);
        assert!("ignore".parse::<Fallthrough>().is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Pattern::new("[", false).is_err());
    }
}
