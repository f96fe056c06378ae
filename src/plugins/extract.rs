// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The `extract-css` plugin.

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::error::Result;
use crate::core::traits::Plugin;
use crate::output::NamingTemplate;
use crate::plugins::{string_option, BuildState, ExtractSettings, Hook};

/// Plugin name.
pub const EXTRACT_CSS: &str = "extract-css";

/// Stylesheet naming template used when `filename` is not given.
pub const DEFAULT_STYLE_FILENAME: &str = "css/[name].css";

/// Turns on stylesheet extraction for the build, so `extract` stages
/// collect CSS into one stylesheet per chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractCss {
    filename: NamingTemplate,
}

impl ExtractCss {
    /// Reads the plugin from descriptor options.
    pub fn from_options(options: &JsonMap<String, JsonValue>) -> Result<Self> {
        let filename = string_option(EXTRACT_CSS, options, "filename")?
            .unwrap_or_else(|| DEFAULT_STYLE_FILENAME.to_string());
        Ok(Self {
            filename: NamingTemplate::parse(&filename)?,
        })
    }
}

impl Plugin for ExtractCss {
    fn name(&self) -> &str {
        EXTRACT_CSS
    }

    fn hooks(&self) -> &[Hook] {
        &[Hook::BeforeRun]
    }

    fn apply(&self, _hook: Hook, state: &mut BuildState) -> Result<()> {
        state.settings_mut()?.extract = Some(ExtractSettings {
            filename: self.filename.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Mode;

    #[test]
    fn test_enables_extraction_with_default_filename() {
        let plugin = ExtractCss::from_options(&JsonMap::new()).unwrap();
        let mut state = BuildState::new(Mode::Production, ".", "");
        state.enter(Hook::BeforeRun, EXTRACT_CSS);
        plugin.apply(Hook::BeforeRun, &mut state).unwrap();
        let settings = state.settings().extract.as_ref().unwrap();
        assert_eq!(settings.filename.as_str(), DEFAULT_STYLE_FILENAME);
    }

    #[test]
    fn test_invalid_filename_template() {
        let mut options = JsonMap::new();
        _ = options.insert("filename".into(), "css/[id].css".into());
        assert!(ExtractCss::from_options(&options).is_err());
    }
}
