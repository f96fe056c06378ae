// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The `hot-module-replacement` plugin.
//!
//! On every rebuild with changed modules it appends a hot update
//! manifest, `<hash>.hot-update.json`, named after the build the client
//! is currently running. Applying the update in the browser is left to
//! an external runtime.

use std::collections::BTreeSet;
use std::path::PathBuf;

use log::info;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Plugin;
use crate::output::{OutputFile, OutputSource};
use crate::plugins::{BuildState, Hook, HotModule};

/// Plugin name.
pub const HOT_MODULE_REPLACEMENT: &str = "hot-module-replacement";

/// Emits hot update manifests on rebuilds.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotModuleReplacement;

impl HotModuleReplacement {
    /// Reads the plugin from descriptor options. It takes none.
    pub fn from_options(options: &JsonMap<String, JsonValue>) -> Result<Self> {
        match options.keys().next() {
            None => Ok(Self),
            Some(key) => Err(AssetFlowError::config_error(
                format!("Plugin `{}` has no option `{}`", HOT_MODULE_REPLACEMENT, key),
                None,
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct HotUpdate<'a> {
    hash: &'a str,
    previous: Option<&'a str>,
    chunks: BTreeSet<&'a str>,
    modules: &'a [HotModule],
}

impl Plugin for HotModuleReplacement {
    fn name(&self) -> &str {
        HOT_MODULE_REPLACEMENT
    }

    fn hooks(&self) -> &[Hook] {
        &[Hook::HotUpdate]
    }

    fn apply(&self, _hook: Hook, state: &mut BuildState) -> Result<()> {
        if state.hot_modules().is_empty() {
            return Ok(());
        }
        let hash = state
            .build_hash()
            .ok_or_else(|| AssetFlowError::internal_error("build hash not computed"))?
            .to_string();
        let previous = state.previous_hash().map(str::to_string);

        let update = HotUpdate {
            hash: &hash,
            previous: previous.as_deref(),
            chunks: state
                .hot_modules()
                .iter()
                .flat_map(|m| m.chunks.iter().map(String::as_str))
                .collect(),
            modules: state.hot_modules(),
        };
        let contents = serde_json::to_vec_pretty(&update)
            .map_err(|e| AssetFlowError::internal_error(e.to_string()))?;
        let path = PathBuf::from(format!(
            "{}.hot-update.json",
            previous.as_deref().unwrap_or(&hash)
        ));
        info!(
            "Hot update {} covers {} modules",
            path.display(),
            update.modules.len()
        );

        state.manifest_mut()?.push(OutputFile {
            path,
            source: OutputSource::Plugin(HOT_MODULE_REPLACEMENT.to_string()),
            contents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Mode;

    fn state(modules: Vec<HotModule>) -> BuildState {
        let mut state = BuildState::new(Mode::Development, ".", "");
        state.build_hash = Some("bbbb".into());
        state.previous_hash = Some("aaaa".into());
        state.hot_modules = modules;
        state.enter(Hook::HotUpdate, HOT_MODULE_REPLACEMENT);
        state
    }

    #[test]
    fn test_writes_update_named_after_previous_hash() {
        let mut state = state(vec![HotModule {
            id: "src/js/greet.js".into(),
            path: "src/js/greet.js".into(),
            chunks: vec!["main".into()],
        }]);
        HotModuleReplacement.apply(Hook::HotUpdate, &mut state).unwrap();

        let file = &state.manifest().files()[0];
        assert_eq!(file.path, PathBuf::from("aaaa.hot-update.json"));
        let json: JsonValue = serde_json::from_slice(&file.contents).unwrap();
        assert_eq!(json["hash"], "bbbb");
        assert_eq!(json["chunks"][0], "main");
        assert_eq!(json["modules"][0]["path"], "src/js/greet.js");
    }

    #[test]
    fn test_nothing_changed_writes_nothing() {
        let mut state = state(Vec::new());
        HotModuleReplacement.apply(Hook::HotUpdate, &mut state).unwrap();
        assert!(state.manifest().is_empty());
    }

    #[test]
    fn test_rejects_options() {
        let mut options = JsonMap::new();
        _ = options.insert("multi_step".into(), true.into());
        assert!(HotModuleReplacement::from_options(&options).is_err());
    }
}
