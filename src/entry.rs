// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entry point resolution.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::debug;

use crate::core::error::{AssetFlowError, Result};

/// A named entry point whose source file was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// Entry (and chunk) name.
    pub name: String,
    /// Path relative to the context, as declared.
    pub path: PathBuf,
    /// Path on disk.
    pub source: PathBuf,
}

/// Maps entry names to source files below a context directory.
#[derive(Debug, Clone, Copy)]
pub struct EntryResolver<'a> {
    context: &'a Path,
}

impl<'a> EntryResolver<'a> {
    /// Creates a resolver for `context`.
    pub fn new(context: &'a Path) -> Self {
        Self { context }
    }

    /// Verifies that `path` exists, is a regular file and is readable.
    pub fn resolve(&self, name: &str, path: &Path) -> Result<ResolvedEntry> {
        let source = self.context.join(path);
        let unresolved =
            |message: String| AssetFlowError::unresolved_entry(name, source.clone(), message);

        let metadata = source
            .metadata()
            .map_err(|e| unresolved(format!("cannot access entry file: {}", e)))?;
        if !metadata.is_file() {
            return Err(unresolved("entry path is not a regular file".to_string()));
        }
        _ = File::open(&source)
            .map_err(|e| unresolved(format!("entry file is not readable: {}", e)))?;

        debug!("Resolved entry `{}` to {}", name, source.display());
        Ok(ResolvedEntry {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolves every entry, in name order, stopping at the first
    /// failure.
    pub fn resolve_all(
        &self,
        entries: &BTreeMap<String, PathBuf>,
    ) -> Result<Vec<ResolvedEntry>> {
        entries
            .iter()
            .map(|(name, path)| self.resolve(name, path))
            .collect()
    }
}
