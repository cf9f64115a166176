use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerSettings {
    pub preferred_port: u16,
    pub redelivery_delay_ms: u64,
    pub inbound_queue_capacity: usize,
    /// Stage local documents under the serving root and load them over
    /// loopback instead of handing the renderer a `file://` URI.
    pub serve_local_documents: bool,
    pub database_file: String,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            preferred_port: DEFAULT_PORT,
            redelivery_delay_ms: 1500,
            inbound_queue_capacity: 64,
            serve_local_documents: true,
            database_file: "Inscribe.db".into(),
        }
    }
}

impl ViewerSettings {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }

    /// `INSCRIBE_PORT` wins over the persisted port when it parses.
    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var("INSCRIBE_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => self.preferred_port = port,
                Err(_) => warn!("Ignoring invalid INSCRIBE_PORT value '{raw}'"),
            }
        }
    }
}

/// Directories the viewer backend works out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Settings file, annotation database and the fallback serving root.
    pub data_dir: PathBuf,
    /// Preferred serving root lives here.
    pub cache_dir: PathBuf,
    /// Bundled renderer assets copied into the serving root.
    pub asset_dir: PathBuf,
}

impl AppPaths {
    const APP_DIR: &'static str = "inscribe";

    /// Platform directories, each overridable through `INSCRIBE_DATA_DIR`,
    /// `INSCRIBE_CACHE_DIR` and `INSCRIBE_ASSET_DIR`.
    pub fn from_env() -> Result<Self> {
        let data_dir = match env::var_os("INSCRIBE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .context("no platform data directory; set INSCRIBE_DATA_DIR")?
                .join(Self::APP_DIR),
        };
        let cache_dir = match env::var_os("INSCRIBE_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .map(|dir| dir.join(Self::APP_DIR))
                .unwrap_or_else(|| data_dir.join("cache")),
        };
        let asset_dir = match env::var_os("INSCRIBE_ASSET_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("assets"),
        };

        Ok(Self {
            data_dir,
            cache_dir,
            asset_dir,
        })
    }

    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            asset_dir: root.join("assets"),
        }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn database_file(&self, settings: &ViewerSettings) -> PathBuf {
        self.data_dir.join(&settings.database_file)
    }

    pub fn primary_serving_root(&self) -> PathBuf {
        self.cache_dir.join("www")
    }

    pub fn fallback_serving_root(&self) -> PathBuf {
        self.data_dir.join("www")
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ViewerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Settings at {} unreadable ({err}); using defaults", path.display());
                ViewerSettings::default()
            })
        } else {
            ViewerSettings::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> ViewerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: ViewerSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &ViewerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
