// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Build descriptor loading, layering and resolution.
pub mod config;

/// `AssetFlowError` and the crate `Result` alias.
pub mod error;

/// The `Handler` and `Plugin` extension traits.
pub mod traits;
