// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chunk shaping plugins: `commons-chunk` and `named-modules`.

use std::collections::{HashMap, HashSet};

use log::debug;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::bundle::{Chunk, ModuleIds};
use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Plugin;
use crate::graph::ModuleId;
use crate::plugins::{string_option, BuildState, Hook};

/// `commons-chunk` plugin name.
pub const COMMONS_CHUNK: &str = "commons-chunk";
/// `named-modules` plugin name.
pub const NAMED_MODULES: &str = "named-modules";

/// Moves modules shared by several chunks into one commons chunk that
/// is loaded before the others.
///
/// Options: `name` (required), `min_chunks` (default 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonsChunk {
    name: String,
    min_chunks: usize,
}

impl CommonsChunk {
    /// Creates the plugin for chunk `name`.
    pub fn new<S: Into<String>>(name: S, min_chunks: usize) -> Self {
        Self {
            name: name.into(),
            min_chunks: min_chunks.max(2),
        }
    }

    /// Reads the plugin from descriptor options.
    pub fn from_options(options: &JsonMap<String, JsonValue>) -> Result<Self> {
        let name = string_option(COMMONS_CHUNK, options, "name")?.ok_or_else(|| {
            AssetFlowError::config_error("Plugin `commons-chunk` requires a `name`", None)
        })?;
        let min_chunks = match options.get("min_chunks") {
            None => 2,
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n >= 2)
                .ok_or_else(|| {
                    AssetFlowError::config_error(
                        format!(
                            "Option `min_chunks` of plugin `commons-chunk` must be an integer of at least 2, got {}",
                            value
                        ),
                        None,
                    )
                })?,
        };
        Ok(Self::new(name, min_chunks))
    }
}

impl Plugin for CommonsChunk {
    fn name(&self) -> &str {
        COMMONS_CHUNK
    }

    fn hooks(&self) -> &[Hook] {
        &[Hook::Optimize]
    }

    fn apply(&self, _hook: Hook, state: &mut BuildState) -> Result<()> {
        let chunks = state.chunks_mut()?;

        let mut counts: HashMap<ModuleId, usize> = HashMap::new();
        for chunk in chunks.iter() {
            for module in &chunk.modules {
                *counts.entry(*module).or_insert(0) += 1;
            }
        }
        let shared: HashSet<ModuleId> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_chunks)
            .map(|(module, _)| module)
            .collect();

        let mut commons = match chunks.iter().position(|c| c.name == self.name) {
            Some(index) => chunks.remove(index),
            None => Chunk {
                name: self.name.clone(),
                modules: Vec::new(),
                commons: true,
            },
        };
        commons.commons = true;

        // First appearance keeps dependencies ahead of their dependents.
        for chunk in chunks.iter() {
            for module in &chunk.modules {
                if shared.contains(module) && !commons.contains(*module) {
                    commons.modules.push(*module);
                }
            }
        }
        for chunk in chunks.iter_mut() {
            chunk.modules.retain(|m| !shared.contains(m));
        }

        debug!(
            "Commons chunk `{}` holds {} modules ({} shared)",
            commons.name,
            commons.modules.len(),
            shared.len()
        );
        chunks.insert(0, commons);
        Ok(())
    }
}

/// Identifies modules in bundles by path instead of index.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedModules;

impl Plugin for NamedModules {
    fn name(&self) -> &str {
        NAMED_MODULES
    }

    fn hooks(&self) -> &[Hook] {
        &[Hook::BeforeRun]
    }

    fn apply(&self, _hook: Hook, state: &mut BuildState) -> Result<()> {
        state.settings_mut()?.module_ids = ModuleIds::Named;
        Ok(())
    }
}
