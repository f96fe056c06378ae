// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Development Server
//!
//! Serves the build output over HTTP while the watch loop rebuilds it.
//! Paths missing from the output directory fall back to the content
//! base, and `GET /__assetflow/status` returns the latest
//! [`BuildStatus`] as JSON so an external overlay can show build errors.
//!
//! The server runs on a tokio runtime in the foreground; the watch loop
//! runs on its own thread.

use std::path::PathBuf;
use std::thread;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info, warn};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;

use crate::core::error::{AssetFlowError, Result};
use crate::watch::{BuildStatus, SharedStatus, Watcher};
use crate::AssetFlow;

/// Route of the build status endpoint.
pub const STATUS_ROUTE: &str = "/__assetflow/status";

/// Builds the server's router.
pub fn router(
    status: SharedStatus,
    out_dir: PathBuf,
    content_base: PathBuf,
    compress: bool,
) -> Router {
    let files = ServeDir::new(out_dir).fallback(ServeDir::new(content_base));
    let app = Router::new()
        .route(STATUS_ROUTE, get(build_status))
        .fallback_service(files)
        .with_state(status);
    if compress {
        app.layer(CompressionLayer::new())
    } else {
        app
    }
}

async fn build_status(State(status): State<SharedStatus>) -> Json<BuildStatus> {
    Json(status.read().clone())
}

/// Watches and serves the project until the process is interrupted.
pub fn serve(flow: AssetFlow) -> Result<()> {
    let config = std::sync::Arc::clone(flow.config());
    let settings = &config.dev_server;
    let status = BuildStatus::shared();

    let watcher = Watcher::new(flow, std::sync::Arc::clone(&status));
    _ = thread::Builder::new()
        .name("assetflow-watch".into())
        .spawn(move || {
            if let Err(e) = watcher.run() {
                error!("Watch loop stopped: {}", e);
            }
        })
        .map_err(|e| AssetFlowError::io_error(config.context.clone(), e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AssetFlowError::internal_error(format!("Failed to start runtime: {}", e)))?;

    runtime.block_on(async {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port))
            .await
            .map_err(|e| {
                AssetFlowError::internal_error(format!(
                    "Failed to bind {}:{}: {}",
                    settings.host, settings.port, e
                ))
            })?;

        let url = format!("http://{}:{}/", settings.host, settings.port);
        info!("Dev server running at {}", url);
        if settings.open {
            if let Err(e) = open_browser(&url) {
                warn!("Could not open a browser: {}", e);
            }
        }

        let app = router(
            status,
            config.output.path.clone(),
            settings.content_base.clone(),
            settings.compress,
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| AssetFlowError::internal_error(format!("Server error: {}", e)))
    })
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        _ = std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        _ = std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        _ = std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use tempfile::TempDir;

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        )
        .unwrap();
        let mut response = String::new();
        _ = stream.read_to_string(&mut response).unwrap();
        response
    }

    #[tokio::test]
    async fn test_status_endpoint_and_content_base_fallback() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dist");
        let base = dir.path().join("src");
        fs::create_dir_all(out.join("js")).unwrap();
        fs::create_dir_all(&base).unwrap();
        fs::write(out.join("js/main.bundle.js"), "console.log(1);").unwrap();
        fs::write(base.join("robots.txt"), "User-agent: *").unwrap();

        let status = BuildStatus::shared();
        status.write().ok = true;
        status.write().hash = Some("0123456789abcdef0123".into());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(status, out, base, false);
        _ = tokio::spawn(async move { axum::serve(listener, app).await });

        let (status, bundle, fallback, missing) = tokio::task::spawn_blocking(move || {
            (
                get(addr, STATUS_ROUTE),
                get(addr, "/js/main.bundle.js"),
                get(addr, "/robots.txt"),
                get(addr, "/nope.css"),
            )
        })
        .await
        .unwrap();

        assert!(status.starts_with("HTTP/1.1 200"));
        assert!(status.contains("\"hash\":\"0123456789abcdef0123\""));
        assert!(bundle.contains("console.log(1);"));
        assert!(fallback.contains("User-agent: *"));
        assert!(missing.starts_with("HTTP/1.1 404"));
    }
}
