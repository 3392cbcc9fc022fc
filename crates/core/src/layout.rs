use std::path::{Path, PathBuf};

/// Installation record for the last release confirmed running.
pub const RECORD_FILE: &str = ".record";
/// Release installed on disk but not yet confirmed running.
pub const STAGED_FILE: &str = ".staged";
/// Download target, replaced on every install.
pub const ARCHIVE_FILE: &str = ".package.zip";
/// Dependency manifest naming the entry-point script.
pub const MANIFEST_FILE: &str = "package.json";

/// On-disk layout under the apps root: one directory per app id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    root: PathBuf,
}

impl AppLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self, app_id: &str) -> PathBuf {
        self.root.join(app_id)
    }

    pub fn record_path(&self, app_id: &str) -> PathBuf {
        self.app_dir(app_id).join(RECORD_FILE)
    }

    pub fn staged_path(&self, app_id: &str) -> PathBuf {
        self.app_dir(app_id).join(STAGED_FILE)
    }
}

pub fn archive_path(install_dir: &Path) -> PathBuf {
    install_dir.join(ARCHIVE_FILE)
}

pub fn manifest_path(install_dir: &Path) -> PathBuf {
    install_dir.join(MANIFEST_FILE)
}
