//! Loopback static server exposing renderer assets and staged documents.
//!
//! [`ServingContext`] is the single process-wide owner of the server. The
//! bridge asks it for the current base URL when it builds a load command.

use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::Router;
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::error::{ViewerError, ViewerResult};

pub mod assets;

pub use assets::{AssetSource, BundleDir, ProvisionReport, ASSET_MANIFEST, VIEWER_ENTRY};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const STAGED_DOCS_DIR: &str = "docs";

#[derive(Debug, Clone)]
pub struct ServingConfig {
    pub primary_root: PathBuf,
    /// Used when the primary root cannot be created or reached.
    pub fallback_root: PathBuf,
    pub preferred_port: u16,
}

struct RunningServer {
    root: PathBuf,
    port: u16,
    base_url: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ServingContext {
    config: ServingConfig,
    assets: Arc<dyn AssetSource>,
    running: Mutex<Option<RunningServer>>,
    /// Staged document copies, keyed by the prefix they were staged under.
    staged: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl ServingContext {
    pub fn new(config: ServingConfig, assets: Arc<dyn AssetSource>) -> Self {
        Self {
            config,
            assets,
            running: Mutex::new(None),
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    /// Stage assets into the primary root, falling back to the secondary root
    /// when the primary is unusable.
    pub async fn provision_assets(&self) -> ViewerResult<(PathBuf, ProvisionReport)> {
        let primary = self.config.primary_root.clone();
        let fallback = self.config.fallback_root.clone();
        let assets = Arc::clone(&self.assets);

        tokio::task::spawn_blocking(move || {
            let report = assets::provision_assets(&primary, assets.as_ref());
            if primary.is_dir() {
                return Ok((primary, report));
            }

            log_warn!(
                "serving root {} not found, using fallback {}",
                primary.display(),
                fallback.display()
            );
            std::fs::create_dir_all(&fallback).map_err(ViewerError::ServerStart)?;
            let report = assets::provision_assets(&fallback, assets.as_ref());
            Ok((fallback, report))
        })
        .await
        .map_err(|err| ViewerError::ServerStart(std::io::Error::other(err)))?
    }

    /// Start the loopback server and return its base URL. A running server is
    /// reused rather than duplicated.
    pub async fn start_server(&self) -> ViewerResult<String> {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.as_ref() {
            return Ok(running.base_url.clone());
        }

        let (root, report) = self.provision_assets().await?;
        if !report.is_complete() {
            log_warn!(
                "{} renderer asset(s) unavailable; viewer may be degraded",
                report.failures.len()
            );
        }

        let listener = bind_loopback(self.config.preferred_port).await?;
        let port = listener
            .local_addr()
            .map_err(ViewerError::ServerStart)?
            .port();
        let base_url = format!("http://{}:{port}", Ipv4Addr::LOCALHOST);

        let shutdown = CancellationToken::new();
        let app = Router::new().fallback_service(ServeDir::new(&root));
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
        let task = tokio::spawn(async move {
            if let Err(err) = serve.await {
                log_error!("local server stopped with error: {err}");
            }
        });

        log_info!("Local server started at {base_url} serving {}", root.display());

        *guard = Some(RunningServer {
            root,
            port,
            base_url: base_url.clone(),
            shutdown,
            task,
        });

        Ok(base_url)
    }

    /// Stop the server if one is running. In-flight fetches are cut off.
    pub async fn stop_server(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.shutdown.cancel();
            running.task.abort();
            log_info!("Local server on port {} stopped", running.port);
        }
    }

    pub async fn restart_server(&self) -> ViewerResult<String> {
        self.stop_server().await;
        self.start_server().await
    }

    pub async fn base_url(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.base_url.clone())
    }

    pub async fn serving_root(&self) -> Option<PathBuf> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.root.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Copy a local document under the serving root and return the URL the
    /// renderer can fetch it from.
    pub async fn stage_document(&self, source: &Path, prefix: &str) -> ViewerResult<String> {
        let (root, base_url) = {
            let guard = self.running.lock().await;
            let running = guard.as_ref().ok_or(ViewerError::ServerNotRunning)?;
            (running.root.clone(), running.base_url.clone())
        };

        let file_name = source
            .file_name()
            .map(|name| sanitize_file_name(&name.to_string_lossy()))
            .unwrap_or_else(|| "document.pdf".to_string());
        let staged_name = format!("{}-{file_name}", sanitize_file_name(prefix));

        let docs_dir = root.join(STAGED_DOCS_DIR);
        let unresolvable = |err: std::io::Error| ViewerError::UnresolvableReference {
            reference: source.display().to_string(),
            reason: err.to_string(),
        };
        tokio::fs::create_dir_all(&docs_dir)
            .await
            .map_err(unresolvable)?;
        let dest = docs_dir.join(&staged_name);
        tokio::fs::copy(source, &dest).await.map_err(unresolvable)?;
        self.staged
            .lock()
            .await
            .entry(prefix.to_string())
            .or_default()
            .push(dest);

        Ok(format!("{base_url}/{STAGED_DOCS_DIR}/{staged_name}"))
    }

    /// Delete every copy staged under `prefix`. Works whether or not the
    /// server is still running; returns how many files were removed.
    pub async fn unstage(&self, prefix: &str) -> usize {
        let Some(paths) = self.staged.lock().await.remove(prefix) else {
            return 0;
        };

        let mut removed = 0;
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => log_warn!("could not remove staged {}: {err}", path.display()),
            }
        }
        if removed > 0 {
            log_info!("Removed {removed} staged document(s) for {prefix}");
        }
        removed
    }
}

/// Bind the preferred port on loopback, retrying once on an ephemeral port.
/// The first failure is the one reported when both attempts fail.
async fn bind_loopback(preferred_port: u16) -> ViewerResult<TcpListener> {
    let preferred = SocketAddr::from((Ipv4Addr::LOCALHOST, preferred_port));
    match TcpListener::bind(preferred).await {
        Ok(listener) => Ok(listener),
        Err(original) => {
            log_warn!("could not bind {preferred} ({original}); retrying on an ephemeral port");
            TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                .await
                .map_err(|fallback_err| {
                    log_error!("ephemeral bind failed too: {fallback_err}");
                    ViewerError::ServerStart(original)
                })
        }
    }
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
