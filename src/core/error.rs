// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Error Handling for AssetFlow
//!
//! This module defines the error type shared by every stage of the asset
//! pipeline. The `thiserror` crate is used to derive `Display` and
//! `Error` so that each variant carries the context a user needs to fix
//! the build: the entry that failed to resolve, the handler that failed,
//! or the two sources fighting over one output path.
//!
//! Every variant is fatal to the current build invocation.

use std::path::PathBuf;
use thiserror::Error;

/// A unified result type for the AssetFlow library.
pub type Result<T> = std::result::Result<T, AssetFlowError>;

/// Boxed source error attached to some variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for AssetFlow.
#[derive(Error, Debug)]
pub enum AssetFlowError {
    /// A named entry point, or a source file referenced by another
    /// asset, does not exist or cannot be read.
    #[error("Resolution error: `{name}` could not be resolved to {path:?}: {message}.")]
    ResolutionError {
        /// Entry name, or the request string used by the importer.
        name: String,
        /// The path that was looked up.
        path: PathBuf,
        /// The asset containing the request, `None` for entry points.
        importer: Option<PathBuf>,
        /// Why the lookup failed.
        message: String,
    },

    /// A handler in a chain failed to transform an asset.
    #[error("Transform error: handler `{handler}` failed on {asset:?}: {message}.")]
    TransformError {
        /// Name of the failing handler.
        handler: String,
        /// Context-relative path of the asset being transformed.
        asset: PathBuf,
        /// Description of the failure.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// Two distinct sources resolved to the same output path.
    #[error("Collision error: {output:?} is produced by both {first} and {second}.")]
    CollisionError {
        /// The contested output path, relative to the output directory.
        output: PathBuf,
        /// Description of the source that claimed the path first.
        first: String,
        /// Description of the source that tried to claim it again.
        second: String,
    },

    /// Malformed configuration: bad rule, handler, plugin descriptor or
    /// config file.
    #[error("Configuration error: {message}.")]
    ConfigError {
        /// Detailed description of the configuration error.
        message: String,
        /// Optional path of the configuration file that caused the error.
        path: Option<PathBuf>,
    },

    /// The HTML template could not be loaded or rendered.
    #[error("Template rendering error: {message} in template `{template}`.")]
    TemplateRenderingError {
        /// Description of the template rendering error.
        message: String,
        /// The template file or identifier associated with the error.
        template: String,
        /// Optional underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// A plugin failed while running a lifecycle hook.
    #[error("Plugin error: `{plugin}` failed during {hook}: {message}.")]
    PluginError {
        /// Name of the failing plugin.
        plugin: String,
        /// The hook being executed.
        hook: String,
        /// Description of the failure.
        message: String,
    },

    /// IO error encountered during file operations.
    #[error("File IO error at `{path:?}`: {source}")]
    IOError {
        /// Path associated with the IO error.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// General internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for AssetFlowError {
    /// Converts a standard IO error into an `IOError` with an empty path.
    fn from(source: std::io::Error) -> Self {
        AssetFlowError::IOError {
            path: PathBuf::new(),
            source,
        }
    }
}

impl AssetFlowError {
    /// Creates a `ResolutionError` for a named entry point.
    pub fn unresolved_entry<S: Into<String>, M: Into<String>>(
        name: S,
        path: PathBuf,
        message: M,
    ) -> Self {
        AssetFlowError::ResolutionError {
            name: name.into(),
            path,
            importer: None,
            message: message.into(),
        }
    }

    /// Creates a `ResolutionError` for a request made by another asset.
    pub fn unresolved_import<S: Into<String>>(
        request: S,
        path: PathBuf,
        importer: PathBuf,
    ) -> Self {
        AssetFlowError::ResolutionError {
            name: request.into(),
            path,
            importer: Some(importer),
            message: "referenced file does not exist".to_string(),
        }
    }

    /// Creates a `TransformError` for the given handler and asset.
    pub fn transform_error<H: Into<String>, M: Into<String>>(
        handler: H,
        asset: PathBuf,
        message: M,
        source: Option<BoxedSource>,
    ) -> Self {
        AssetFlowError::TransformError {
            handler: handler.into(),
            asset,
            message: message.into(),
            source,
        }
    }

    /// Creates a `CollisionError` for a contested output path.
    pub fn collision_error<F: Into<String>, S: Into<String>>(
        output: PathBuf,
        first: F,
        second: S,
    ) -> Self {
        AssetFlowError::CollisionError {
            output,
            first: first.into(),
            second: second.into(),
        }
    }

    /// Creates a `ConfigError` with a specific message.
    pub fn config_error<S: Into<String>>(
        message: S,
        path: Option<PathBuf>,
    ) -> Self {
        AssetFlowError::ConfigError {
            message: message.into(),
            path,
        }
    }

    /// Creates a `TemplateRenderingError` with a message and template name.
    pub fn template_rendering_error<S: Into<String>>(
        message: S,
        template: String,
        source: Option<BoxedSource>,
    ) -> Self {
        AssetFlowError::TemplateRenderingError {
            message: message.into(),
            template,
            source,
        }
    }

    /// Creates a `PluginError` for the given plugin and hook.
    pub fn plugin_error<P: Into<String>, H: Into<String>, M: Into<String>>(
        plugin: P,
        hook: H,
        message: M,
    ) -> Self {
        AssetFlowError::PluginError {
            plugin: plugin.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Wraps an IO error as an `IOError` variant with the specified path.
    pub fn io_error(path: PathBuf, source: std::io::Error) -> Self {
        AssetFlowError::IOError { path, source }
    }

    /// Creates a general internal error with a custom message.
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        AssetFlowError::InternalError(message.into())
    }

    /// Short machine-friendly name of the error kind, used by the dev
    /// server status endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            AssetFlowError::ResolutionError { .. } => "resolution",
            AssetFlowError::TransformError { .. } => "transform",
            AssetFlowError::CollisionError { .. } => "collision",
            AssetFlowError::ConfigError { .. } => "config",
            AssetFlowError::TemplateRenderingError { .. } => "template",
            AssetFlowError::PluginError { .. } => "plugin",
            AssetFlowError::IOError { .. } => "io",
            AssetFlowError::InternalError(_) => "internal",
        }
    }
}
