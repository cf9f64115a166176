use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::ViewerError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Renderer files mirrored verbatim into the serving root.
pub const ASSET_MANIFEST: &[&str] = &[
    "viewer.html",
    "js/pdf.min.js",
    "js/pdf.worker.min.js",
    "css/pdf_viewer.min.css",
];

/// Subdirectories created under the serving root; `docs` holds staged documents.
pub const SERVING_SUBDIRS: &[&str] = &["js", "css", "docs"];

pub const VIEWER_ENTRY: &str = "viewer.html";

/// Read-only origin of the renderer assets.
pub trait AssetSource: Send + Sync {
    fn contains(&self, asset: &str) -> bool;
    fn copy_to(&self, asset: &str, dest: &Path) -> io::Result<u64>;
}

/// Assets shipped next to the application in a plain directory.
#[derive(Debug, Clone)]
pub struct BundleDir {
    root: PathBuf,
}

impl BundleDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for BundleDir {
    fn contains(&self, asset: &str) -> bool {
        self.root.join(asset).is_file()
    }

    fn copy_to(&self, asset: &str, dest: &Path) -> io::Result<u64> {
        fs::copy(self.root.join(asset), dest)
    }
}

#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub copied: Vec<String>,
    pub already_present: Vec<String>,
    pub failures: Vec<ViewerError>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Stage every manifest asset into `root`. Existing files are never touched
/// and a missing asset does not stop the others from being copied.
pub fn provision_assets(root: &Path, source: &dyn AssetSource) -> ProvisionReport {
    let mut report = ProvisionReport::default();

    for dir in std::iter::once(root.to_path_buf())
        .chain(SERVING_SUBDIRS.iter().map(|sub| root.join(sub)))
    {
        if dir.is_dir() {
            continue;
        }
        if let Err(err) = fs::create_dir_all(&dir) {
            log_warn!("could not create {}: {err}", dir.display());
            report.failures.push(ViewerError::Provisioning {
                asset: dir.display().to_string(),
                reason: err.to_string(),
            });
            return report;
        }
    }

    for asset in ASSET_MANIFEST {
        let dest = root.join(asset);
        if dest.exists() {
            log_debug!("already exists: {}", dest.display());
            report.already_present.push(asset.to_string());
            continue;
        }

        if !source.contains(asset) {
            log_warn!("asset not found in bundle: {asset}");
            report.failures.push(ViewerError::Provisioning {
                asset: asset.to_string(),
                reason: "missing from bundle".into(),
            });
            continue;
        }

        match source.copy_to(asset, &dest) {
            Ok(bytes) => {
                log_info!("copied {asset} ({bytes} bytes)");
                report.copied.push(asset.to_string());
            }
            Err(err) => {
                log_warn!("failed to copy asset {asset}: {err}");
                report.failures.push(ViewerError::Provisioning {
                    asset: asset.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if let Ok(entries) = fs::read_dir(root) {
        let names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        log_debug!("serving root listing: {names:?}");
    }

    report
}
