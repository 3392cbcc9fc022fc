use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("cannot open archive: {0}")]
    Open(#[source] io::Error),
    #[error("corrupt archive: {0}")]
    Corrupt(#[from] zip::result::ZipError),
    #[error("archive entry '{0}' escapes the extraction directory")]
    UnsafePath(String),
    #[error("archive has no top-level directory")]
    NoTopLevelDir,
    #[error("archive has {0} top-level entries, expected a single directory")]
    MultipleTopLevel(usize),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Extracts a release archive whose contents sit under one top-level
/// directory (e.g. `owner-repo-sha/`) directly into `dest`, overwriting
/// existing files. Returns the number of files written.
pub fn extract_flattened(archive_path: &Path, dest: &Path) -> Result<usize, UnpackError> {
    let file = File::open(archive_path).map_err(UnpackError::Open)?;
    let mut archive = ZipArchive::new(file)?;

    let root = top_level_dir(&mut archive)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let path = entry
            .enclosed_name()
            .ok_or_else(|| UnpackError::UnsafePath(name.clone()))?;
        let rel = match path.strip_prefix(&root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => return Err(UnpackError::UnsafePath(name)),
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&rel);
        let write_err = |source: io::Error| UnpackError::Write {
            path: target.clone(),
            source,
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(write_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut out = File::create(&target).map_err(write_err)?;
        io::copy(&mut entry, &mut out).map_err(write_err)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o777))
                .map_err(write_err)?;
        }
        written += 1;
    }
    Ok(written)
}

/// The single directory every entry lives under.
fn top_level_dir(archive: &mut ZipArchive<File>) -> Result<PathBuf, UnpackError> {
    let mut roots = BTreeSet::new();
    let mut root_is_dir = false;

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let path = entry
            .enclosed_name()
            .ok_or_else(|| UnpackError::UnsafePath(entry.name().to_string()))?;
        let mut components = path.components().filter(|c| matches!(c, Component::Normal(_)));
        let Some(first) = components.next() else {
            continue;
        };
        roots.insert(PathBuf::from(first.as_os_str()));
        if entry.is_dir() || components.next().is_some() {
            root_is_dir = true;
        }
    }

    if roots.len() > 1 {
        return Err(UnpackError::MultipleTopLevel(roots.len()));
    }
    match roots.pop_first() {
        Some(root) if root_is_dir => Ok(root),
        _ => Err(UnpackError::NoTopLevelDir),
    }
}
