#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use appkeeper_core::config::Config;
use appkeeper_core::fleet::{Backends, FleetReconciler};
use appkeeper_core::install::{DependencyCommand, DownloadError, Downloader, PackageInstaller};
use appkeeper_core::layout::AppLayout;
use appkeeper_core::model::{AppSpec, ProcessNaming, ReleaseDescriptor, ReleaseId, RepoRef};
use appkeeper_core::reconcile::AppReconciler;
use appkeeper_core::release::{ReleaseError, ReleaseSource};
use appkeeper_core::supervisor::{MemorySupervisor, SupervisorAdapter};
use async_trait::async_trait;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const PREFIX: &str = "managed.";

/// Release host double keyed by repository name.
#[derive(Default)]
pub struct ScriptedReleases {
    releases: Mutex<HashMap<String, ReleaseDescriptor>>,
    calls: AtomicUsize,
}

impl ScriptedReleases {
    pub fn set(&self, repo: &str, release: ReleaseDescriptor) {
        self.releases
            .lock()
            .unwrap()
            .insert(repo.to_string(), release);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for ScriptedReleases {
    async fn resolve(&self, repo: &RepoRef) -> Result<ReleaseDescriptor, ReleaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.releases
            .lock()
            .unwrap()
            .get(&repo.name)
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound {
                repo: repo.to_string(),
                wanted: "latest release".into(),
            })
    }
}

/// Serves archives from memory and counts downloads per URL.
#[derive(Default)]
pub struct FixtureDownloader {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<String>>,
}

impl FixtureDownloader {
    pub fn serve(&self, url: &str, zip: Vec<u8>) {
        self.archives.lock().unwrap().insert(url.to_string(), zip);
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for FixtureDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.downloads.lock().unwrap().push(url.to_string());
        let body = self
            .archives
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError(format!("404 for {url}")))?;
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| DownloadError(e.to_string()))?;
        Ok(body.len() as u64)
    }
}

/// Zips `src` the way release hosts do: everything under one `root/` folder.
pub fn zip_dir(src: &Path, root: &str) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().unix_permissions(0o644);
    zip.add_directory(format!("{root}/"), options).unwrap();
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(src).unwrap().to_string_lossy().replace('\\', "/");
        let name = format!("{root}/{rel}");
        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options).unwrap();
        } else {
            zip.start_file(name, options).unwrap();
            zip.write_all(&std::fs::read(entry.path()).unwrap()).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

/// A small node package whose manifest names `server.js` as entry point.
pub fn package_zip(repo: &str, release: u64) -> Vec<u8> {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(
        src.path().join("package.json"),
        format!(r#"{{"name":"{repo}","main":"server.js"}}"#),
    )
    .unwrap();
    std::fs::write(src.path().join("server.js"), format!("// release {release}\n")).unwrap();
    std::fs::create_dir_all(src.path().join("lib")).unwrap();
    std::fs::write(src.path().join("lib/util.js"), "module.exports = {};\n").unwrap();
    zip_dir(src.path(), &format!("owner-{repo}-{release:07x}"))
}

pub fn app(id: &str, repo: &str) -> AppSpec {
    AppSpec {
        id: id.to_string(),
        repo: RepoRef {
            owner: "owner".into(),
            name: repo.to_string(),
            release: Default::default(),
        },
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub releases: Arc<ScriptedReleases>,
    pub downloader: Arc<FixtureDownloader>,
    pub supervisor: Arc<MemorySupervisor>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            releases: Arc::new(ScriptedReleases::default()),
            downloader: Arc::new(FixtureDownloader::default()),
            supervisor: Arc::new(MemorySupervisor::new()),
        }
    }

    pub fn apps_root(&self) -> PathBuf {
        self.dir.path().join("apps")
    }

    pub fn app_dir(&self, id: &str) -> PathBuf {
        self.apps_root().join(id)
    }

    /// Makes `release` the latest release of `repo` and serves its archive.
    pub fn publish(&self, repo: &str, release: u64, name: &str) -> ReleaseDescriptor {
        let url = format!("https://releases.test/{repo}/{release}.zip");
        self.downloader.serve(&url, package_zip(repo, release));
        let descriptor = ReleaseDescriptor {
            id: ReleaseId(release),
            name: name.to_string(),
            archive_url: url,
        };
        self.releases.set(repo, descriptor.clone());
        descriptor
    }

    pub fn backends(&self) -> Backends {
        Backends {
            releases: self.releases.clone(),
            downloader: self.downloader.clone(),
            supervisor: self.supervisor.clone(),
        }
    }

    pub fn config(&self, apps: Vec<AppSpec>, deps: &[&str]) -> Config {
        let mut config = Config::default();
        config.apps = apps;
        config.maintenance.apps_path = self.apps_root().to_string_lossy().into_owned();
        config.maintenance.dependency_command = deps.iter().map(|s| s.to_string()).collect();
        config
    }

    pub fn reconciler(&self, deps: &[&str]) -> AppReconciler {
        let argv: Vec<String> = deps.iter().map(|s| s.to_string()).collect();
        AppReconciler::new(
            AppLayout::new(self.apps_root()),
            self.releases.clone(),
            PackageInstaller::new(
                self.downloader.clone(),
                DependencyCommand::from_argv(&argv, true).unwrap(),
            ),
            SupervisorAdapter::new(self.supervisor.clone()),
            ProcessNaming::new(PREFIX),
        )
    }

    pub fn fleet(&self, deps: &[&str]) -> FleetReconciler {
        FleetReconciler::from_config(&self.config(Vec::new(), deps), self.apps_root(), &self.backends())
            .unwrap()
    }

    /// Lays down an installed-looking app directory with a record.
    pub fn seed_installed(&self, id: &str, release: u64) {
        let dir = self.app_dir(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), "{}").unwrap();
        std::fs::write(
            dir.join(".record"),
            format!(r#"{{"release_id":{release},"release_name":"v{release}"}}"#),
        )
        .unwrap();
    }
}
