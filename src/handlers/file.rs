// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! File emission and image handlers.

use log::trace;

use crate::core::error::{AssetFlowError, Result};
use crate::core::traits::Handler;
use crate::handlers::{
    option_str, require_string_option, ContentKind, EmitRequest,
    HandlerContext, HandlerOptions, Transformed,
};
use crate::output::NamingTemplate;

/// `file` handler name.
pub const FILE: &str = "file";
/// `image` handler name.
pub const IMAGE: &str = "image";

/// Naming template used when `name` is not given.
pub const DEFAULT_FILE_NAME: &str = "[name].[ext]";

/// Requests emission of the asset as a standalone output file.
///
/// The output path is `output_path` followed by the `name` template.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHandler;

impl FileHandler {
    fn template(options: &HandlerOptions) -> String {
        let name = option_str(options, "name").unwrap_or(DEFAULT_FILE_NAME);
        match option_str(options, "output_path") {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/{}", prefix.trim_end_matches('/'), name)
            }
            _ => name.to_string(),
        }
    }
}

impl Handler for FileHandler {
    fn name(&self) -> &str {
        FILE
    }

    fn validate(&self, options: &HandlerOptions) -> Result<()> {
        require_string_option(options, FILE, "name")?;
        require_string_option(options, FILE, "output_path")?;
        _ = NamingTemplate::parse(&Self::template(options))?;
        Ok(())
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        let template = Self::template(options);
        trace!("{} will be emitted as {}", ctx.asset.display(), template);
        input.emit = Some(EmitRequest { template });
        Ok(input)
    }
}

/// Checks that image bytes carry the signature their extension
/// promises. Images are not re-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageHandler;

impl Handler for ImageHandler {
    fn name(&self) -> &str {
        IMAGE
    }

    fn apply(
        &self,
        input: Transformed,
        _options: &HandlerOptions,
        ctx: &HandlerContext<'_>,
    ) -> Result<Transformed> {
        input.expect_kind(IMAGE, ctx.asset, &[ContentKind::Binary])?;
        let ext = ctx
            .asset
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let Some(format) = ImageFormat::from_extension(&ext) else {
            trace!("No signature known for {}", ctx.asset.display());
            return Ok(input);
        };

        if format.matches(&input.contents) {
            Ok(input)
        } else {
            Err(AssetFlowError::transform_error(
                IMAGE,
                ctx.asset.to_path_buf(),
                format!("content is not a valid {} image", format.label()),
                None,
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Svg,
}

impl ImageFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            "svg" => Some(ImageFormat::Svg),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Gif => "GIF",
            ImageFormat::Svg => "SVG",
        }
    }

    fn matches(self, bytes: &[u8]) -> bool {
        match self {
            ImageFormat::Png => bytes.starts_with(b"\x89PNG\r\n\x1a\n"),
            ImageFormat::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            ImageFormat::Gif => {
                bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")
            }
            ImageFormat::Svg => {
                // The root element may follow an XML declaration,
                // comments or a doctype.
                let head = &bytes[..bytes.len().min(1024)];
                String::from_utf8_lossy(head).contains("<svg")
            }
        }
    }
}
