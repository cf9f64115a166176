pub mod bridge;
pub mod capabilities;
pub mod commands;
pub mod db;
pub mod error;
pub mod export;
pub mod resolver;
pub mod server;
pub mod settings;
pub mod utils;

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use log::{error, info, warn};
use tokio::sync::Mutex;

use bridge::Bridge;
use capabilities::{Clipboard, IdentityProvider, MemoryClipboard, StaticIdentity};
use db::AnnotationStore;
use resolver::{ProviderDirectories, Resolver};
use server::{BundleDir, ServingConfig, ServingContext};
use settings::{AppPaths, SettingsStore};

/// Open sessions by id. Shared with each session's inbound task so the task
/// can deregister itself when the session ends.
pub(crate) type SessionRegistry = Arc<Mutex<HashMap<String, Bridge>>>;

pub struct AppState {
    pub settings: SettingsStore,
    pub serving: Arc<ServingContext>,
    pub store: Arc<AnnotationStore>,
    pub resolver: Resolver,
    pub identity: Arc<dyn IdentityProvider>,
    pub clipboard: Arc<dyn Clipboard>,
    pub(crate) sessions: SessionRegistry,
}

impl AppState {
    pub fn new(
        settings: SettingsStore,
        serving: Arc<ServingContext>,
        store: Arc<AnnotationStore>,
        resolver: Resolver,
        identity: Arc<dyn IdentityProvider>,
        clipboard: Arc<dyn Clipboard>,
    ) -> Self {
        Self {
            settings,
            serving,
            store,
            resolver,
            identity,
            clipboard,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire up the default collaborators under `paths` and open the store.
    pub async fn bootstrap(paths: &AppPaths) -> anyhow::Result<Self> {
        let data_dir = paths.data_dir.clone();
        let settings_file = paths.settings_file();
        let settings = tokio::task::spawn_blocking(move || -> anyhow::Result<SettingsStore> {
            std::fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data directory {}", data_dir.display())
            })?;
            SettingsStore::new(settings_file)
        })
        .await
        .context("settings load task failed")??;
        let current = settings.current();

        let store = Arc::new(AnnotationStore::new(paths.database_file(&current)));
        store.open().await?;
        store.ensure_schema().await?;

        let serving = Arc::new(ServingContext::new(
            ServingConfig {
                primary_root: paths.primary_serving_root(),
                fallback_root: paths.fallback_serving_root(),
                preferred_port: current.preferred_port,
            },
            Arc::new(BundleDir::new(paths.asset_dir.clone())),
        ));

        Ok(Self::new(
            settings,
            serving,
            store,
            Resolver::with_providers(ProviderDirectories::new()),
            Arc::new(StaticIdentity::default()),
            Arc::new(MemoryClipboard::new()),
        ))
    }

    /// Close every open session and stop the local server.
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, Bridge)> = self.sessions.lock().await.drain().collect();
        for (session_id, bridge) in sessions {
            bridge.close().await;
            self.serving.unstage(&session_id).await;
        }
        self.serving.stop_server().await;
    }
}

async fn serve_until_interrupted() -> anyhow::Result<()> {
    let paths = AppPaths::from_env()?;
    let state = AppState::bootstrap(&paths).await?;

    match state.serving.start_server().await {
        Ok(base_url) => info!("Viewer available at {base_url}/{}", server::VIEWER_ENTRY),
        Err(err) => warn!("Local server unavailable ({err}); documents fall back to file URIs"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    state.shutdown().await;
    Ok(())
}

pub fn run() {
    utils::logging::init();

    log::info!("Inscribe starting up...");

    let result = tokio::runtime::Runtime::new()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(serve_until_interrupted()));

    if let Err(err) = result {
        error!("Inscribe stopped: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_prepares_data_dir_settings_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::rooted_at(dir.path());

        let state = AppState::bootstrap(&paths).await.unwrap();

        assert!(paths.data_dir.is_dir());
        assert!(state.store.is_open().await);
        assert!(state.sessions.lock().await.is_empty());
        assert_eq!(state.settings.current().database_file, "Inscribe.db");
        assert!(paths.data_dir.join("Inscribe.db").is_file());
        assert!(!state.serving.is_running().await);
    }
}
