// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Core Traits Module
//!
//! The two extension seams of the pipeline:
//!
//! - [`Handler`]: one transform stage of an asset rule's chain
//! - [`Plugin`]: code run at named build lifecycle hooks
//!
//! Both are object safe and `Send + Sync` so registries can hold them as
//! `Arc<dyn _>`.

use crate::core::error::Result;
use crate::handlers::{HandlerContext, HandlerOptions, Transformed};
use crate::plugins::{BuildState, Hook};

/// A content transform stage.
///
/// Handlers receive the output of the stage declared after them and
/// return input for the stage declared before them.
pub trait Handler: Send + Sync + std::fmt::Debug {
    /// Name used to reference the handler in rule chains.
    fn name(&self) -> &str;

    /// Checks descriptor options when the chain is resolved.
    ///
    /// # Returns
    /// * `Result<()>` - A `ConfigError` if the options are malformed.
    fn validate(&self, _options: &HandlerOptions) -> Result<()> {
        Ok(())
    }

    /// Transforms content.
    ///
    /// # Arguments
    /// * `input` - Output of the previous stage, or the raw file.
    /// * `options` - The descriptor's options.
    /// * `ctx` - Per-asset information.
    ///
    /// # Returns
    /// * `Result<Transformed>` - The transformed content, or an error.
    fn apply(
        &self,
        input: Transformed,
        options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed>;
}

/// A build lifecycle extension.
///
/// Plugins are invoked in registration order at every hook they list in
/// [`Plugin::hooks`], receiving the explicit build state. Which sections
/// of the state are writable depends on the hook.
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// Name used in configuration and error messages.
    fn name(&self) -> &str;

    /// Hooks this plugin wants to be called at.
    fn hooks(&self) -> &[Hook];

    /// Runs the plugin at `hook`.
    fn apply(&self, hook: Hook, state: &mut BuildState) -> Result<()>;
}
