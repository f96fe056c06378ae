// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Watch Mode
//!
//! Reruns the build whenever files below the project context change.
//! Filesystem events are debounced with `notify-debouncer-mini` and
//! handled on a single loop, so two builds never overlap. Events inside
//! the output directory are ignored, otherwise every build would
//! trigger the next one.
//!
//! The outcome of every build is published in a shared [`BuildStatus`].
//! A failed rebuild is logged and recorded there; since a failed build
//! writes nothing, the previous output stays on disk.

use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use parking_lot::RwLock;
use serde::Serialize;

use crate::core::error::{AssetFlowError, Result};
use crate::{AssetFlow, BuildReport};

/// Build status shared between the watch loop and the dev server.
pub type SharedStatus = Arc<RwLock<BuildStatus>>;

/// Failure details published in the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    /// Short error kind, such as `transform` or `resolution`.
    pub kind: String,
    /// Full error message.
    pub message: String,
}

/// Outcome of the most recent build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStatus {
    /// Whether the last build succeeded. `false` before the first build.
    pub ok: bool,
    /// Number of builds attempted.
    pub builds: u64,
    /// Hash of the output currently on disk.
    pub hash: Option<String>,
    /// Why the last build failed, if it did.
    pub error: Option<StatusError>,
    /// Modules changed by the last successful rebuild.
    pub changed: Vec<String>,
    /// Warnings of the last successful build.
    pub warnings: Vec<String>,
    /// Seconds since the Unix epoch when the last build finished.
    pub finished_at: u64,
    /// Duration of the last successful build, in milliseconds.
    pub duration_ms: u64,
}

impl BuildStatus {
    /// Creates a shared status for a build that has not run yet.
    pub fn shared() -> SharedStatus {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Records a successful build.
    pub fn record_success(&mut self, report: &BuildReport) {
        self.ok = true;
        self.builds += 1;
        self.hash = Some(report.hash.clone());
        self.error = None;
        self.changed = report.changed.clone();
        self.warnings = report.warnings.clone();
        self.finished_at = now();
        self.duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX);
    }

    /// Records a failed build. The hash keeps naming the output that is
    /// still on disk.
    pub fn record_failure(&mut self, error: &AssetFlowError) {
        self.ok = false;
        self.builds += 1;
        self.error = Some(StatusError {
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        self.changed.clear();
        self.finished_at = now();
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Rebuilds a project on change.
#[derive(Debug)]
pub struct Watcher {
    flow: AssetFlow,
    status: SharedStatus,
    built: bool,
}

impl Watcher {
    /// Creates a watcher publishing into `status`.
    pub fn new(flow: AssetFlow, status: SharedStatus) -> Self {
        Self {
            flow,
            status,
            built: false,
        }
    }

    /// The status this watcher publishes into.
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    /// Runs one build and records its outcome, returning the report of
    /// a successful build.
    ///
    /// The first successful build is a full build. Later builds are
    /// rebuilds, emitting hot updates when the dev server has `hot` on.
    pub fn build_once(&mut self) -> Option<BuildReport> {
        let hot = self.built && self.flow.config().dev_server.hot;
        let result = if hot {
            self.flow.rebuild()
        } else {
            self.flow.build()
        };

        match result {
            Ok(report) => {
                self.built = true;
                for warning in &report.warnings {
                    warn!("{}", warning);
                }
                if !report.changed.is_empty() {
                    info!("Changed: {}", report.changed.join(", "));
                }
                self.status.write().record_success(&report);
                Some(report)
            }
            Err(e) => {
                error!("Build failed: {}", e);
                self.status.write().record_failure(&e);
                None
            }
        }
    }

    /// Whether a changed path should trigger a rebuild.
    pub fn is_relevant(&self, path: &Path) -> bool {
        is_relevant(path, &self.flow.config().output.path)
    }

    /// Builds once, then blocks rebuilding on every relevant batch of
    /// changes. Only fails when the watcher itself cannot be set up or
    /// its channel closes.
    pub fn run(mut self) -> Result<()> {
        let config = Arc::clone(self.flow.config());
        let root = config.context.clone();
        let debounce = Duration::from_millis(config.dev_server.debounce_ms);

        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(debounce, tx).map_err(|e| {
            AssetFlowError::internal_error(format!("Failed to initialise file watcher: {}", e))
        })?;
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| {
                AssetFlowError::internal_error(format!(
                    "Failed to watch {}: {}",
                    root.display(),
                    e
                ))
            })?;

        _ = self.build_once();
        info!("Watching {} for changes", root.display());

        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let changed: Vec<PathBuf> = events
                        .into_iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .map(|e| e.path)
                        .filter(|p| self.is_relevant(p))
                        .collect();
                    if changed.is_empty() {
                        continue;
                    }
                    for path in &changed {
                        info!("Changed on disk: {}", path.display());
                    }
                    _ = self.build_once();
                }
                Ok(Err(e)) => warn!("Watch error: {:?}", e),
                Err(e) => {
                    return Err(AssetFlowError::internal_error(format!(
                        "Watch channel closed: {}",
                        e
                    )))
                }
            }
        }
    }
}

/// Paths inside the output directory, hidden files and editor backups
/// never trigger a rebuild.
pub fn is_relevant(path: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return false;
    }
    if let (Ok(path), Ok(out)) = (path.canonicalize(), out_dir.canonicalize()) {
        if path.starts_with(out) {
            return false;
        }
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !(name.starts_with('.') || name.ends_with('~') || name.ends_with(".swp"))
}
