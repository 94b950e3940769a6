use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "bequest";
pub const APP_NAME: &str = "vault";

pub const CATALOG_FILE: &str = "catalog.json";
pub const BLOBS_DIR: &str = "blobs";
pub const KEY_STORE_FILE: &str = "keys.dat";
pub const ACTIVITY_FILE: &str = "activity.json";
pub const AUDIT_LOG_FILE: &str = "audit.log";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("BEQUEST_DATA_DIR") {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn catalog_path(root: &Path) -> PathBuf {
    root.join(CATALOG_FILE)
}

pub fn blobs_dir(root: &Path) -> PathBuf {
    root.join(BLOBS_DIR)
}

pub fn key_store_path(root: &Path) -> PathBuf {
    root.join(KEY_STORE_FILE)
}

pub fn activity_path(root: &Path) -> PathBuf {
    root.join(ACTIVITY_FILE)
}

pub fn log_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

pub fn audit_log_path(root: &Path) -> PathBuf {
    log_dir(root).join(AUDIT_LOG_FILE)
}
