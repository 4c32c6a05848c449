use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::error::IndexerError;

// directories holding dataset bookkeeping rather than payload
pub const DATASET_META_DIRS: [&str; 2] = [".git", ".datalad"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceMethod {
    HardLink,
    Copy,
}

pub fn link_or_copy(source: &Path, dest: &Path) -> Result<PlaceMethod, IndexerError> {
    link_or_copy_with(source, dest, |from, to| fs::hard_link(from, to))
}

pub fn link_or_copy_with<L>(source: &Path, dest: &Path, link: L) -> Result<PlaceMethod, IndexerError>
where
    L: Fn(&Path, &Path) -> io::Result<()>,
{
    if dest.exists() {
        return Err(IndexerError::Filesystem(format!(
            "refusing to overwrite {}",
            dest.display()
        )));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    }
    match link(source, dest) {
        Ok(()) => Ok(PlaceMethod::HardLink),
        Err(err) if link_unsupported(&err) => {
            warn!(
                source = %source.display(),
                %err,
                "hard link unsupported, copying instead"
            );
            copy_file_atomic(source, dest)?;
            Ok(PlaceMethod::Copy)
        }
        Err(err) => Err(IndexerError::Filesystem(format!(
            "link {} to {}: {err}",
            source.display(),
            dest.display()
        ))),
    }
}

fn link_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::CrossesDevices | io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
    )
}

pub fn copy_file_atomic(source: &Path, dest: &Path) -> Result<(), IndexerError> {
    let parent = dest
        .parent()
        .ok_or_else(|| IndexerError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".dicom-indexer-file")
        .tempfile_in(parent)
        .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    fs::copy(source, temp.path()).map_err(|err| {
        IndexerError::Filesystem(format!("copy {}: {err}", source.display()))
    })?;
    if dest.exists() {
        fs::remove_file(dest).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest)
        .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<(), IndexerError> {
    fs::create_dir_all(dest).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    for entry in walk_files(source, &[])? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        }
        fs::copy(&entry, &target).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn walk_files(root: &Path, skip: &[&str]) -> Result<Vec<PathBuf>, IndexerError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| IndexerError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
            if file_type.is_dir() {
                let skipped = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| skip.contains(&name))
                    .unwrap_or(false);
                if !skipped {
                    stack.push(path);
                }
            } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
                // annexed files are symlinks into the object store
                items.push(path);
            }
        }
    }
    items.sort();
    Ok(items)
}

pub fn zip_dir(source_dir: &Path, archive_path: &Path) -> Result<(), IndexerError> {
    let file = fs::File::create(archive_path).map_err(|err| {
        IndexerError::Filesystem(format!("create zip {}: {err}", archive_path.display()))
    })?;
    let mut writer = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for path in walk_files(source_dir, &[])? {
        if path == archive_path {
            continue;
        }
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer
            .start_file(name, options)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        let mut input =
            fs::File::open(&path).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut writer).map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<usize, IndexerError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| IndexerError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| IndexerError::Filesystem(err.to_string()))?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        files += 1;
    }
    Ok(files)
}
