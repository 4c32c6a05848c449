use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ArchiveFormat, CompressionConfig};
use crate::dataset::{DatasetEngine, WorkingDataset, find_in_path};
use crate::domain::{InputSource, REMOTE_INPUT_SCHEMES};
use crate::error::IndexerError;
use crate::fs_util::{self, PlaceMethod};
use crate::metadata::MetadataExtractor;
use crate::workdir::ScopedWorkdir;

pub const ARCHIVE_COMMIT_MESSAGE: &str = "add dicoms archive";
pub const INDEX_COMMIT_MESSAGE: &str = "index dicoms from archive";

pub trait Compressor: Send + Sync {
    fn extension(&self) -> &'static str;
    fn compress(&self, source_dir: &Path, archive: &Path) -> Result<(), IndexerError>;
}

#[derive(Clone)]
pub struct SevenZipCompressor {
    program: Option<PathBuf>,
    options: Vec<String>,
}

impl SevenZipCompressor {
    pub fn new(options: Vec<String>) -> Self {
        Self {
            program: find_in_path("7z"),
            options,
        }
    }
}

impl Compressor for SevenZipCompressor {
    fn extension(&self) -> &'static str {
        ArchiveFormat::SevenZip.extension()
    }

    fn compress(&self, source_dir: &Path, archive: &Path) -> Result<(), IndexerError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| IndexerError::MissingTool("7z".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.arg("u").arg(archive).arg(".").args(&self.options);
        cmd.current_dir(source_dir);
        debug!(archive = %archive.display(), options = ?self.options, "running 7z");
        let output = cmd.output().map_err(|err| IndexerError::ToolFailed {
            tool: "7z".to_string(),
            message: err.to_string(),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(IndexerError::ToolFailed {
                tool: "7z".to_string(),
                message: if stderr.is_empty() {
                    format!("7z exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCompressor;

impl Compressor for ZipCompressor {
    fn extension(&self) -> &'static str {
        ArchiveFormat::Zip.extension()
    }

    fn compress(&self, source_dir: &Path, archive: &Path) -> Result<(), IndexerError> {
        fs_util::zip_dir(source_dir, archive)?;
        let files = fs_util::validate_zip(archive)?;
        debug!(archive = %archive.display(), files, "zip archive written");
        Ok(())
    }
}

pub fn compressor_for(config: &CompressionConfig) -> Box<dyn Compressor> {
    match config.format {
        ArchiveFormat::SevenZip => Box::new(SevenZipCompressor::new(config.options.clone())),
        ArchiveFormat::Zip => Box::new(ZipCompressor),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMethod {
    Compressed,
    HardLink,
    Copy,
    UrlSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveArtifact {
    pub path: Utf8PathBuf,
    pub source: String,
    pub method: IngestMethod,
    pub ingested_at: String,
}

pub type LinkFn = fn(&Path, &Path) -> io::Result<()>;

fn hard_link(from: &Path, to: &Path) -> io::Result<()> {
    fs::hard_link(from, to)
}

pub struct ArchiveIngester<'a, E: DatasetEngine> {
    engine: &'a E,
    compressor: Box<dyn Compressor>,
    series: Option<&'a dyn MetadataExtractor>,
    link: LinkFn,
}

impl<'a, E: DatasetEngine> ArchiveIngester<'a, E> {
    pub fn new(engine: &'a E, compressor: Box<dyn Compressor>) -> Self {
        Self {
            engine,
            compressor,
            series: None,
            link: hard_link,
        }
    }

    pub fn with_series_sorting(mut self, extractor: &'a dyn MetadataExtractor) -> Self {
        self.series = Some(extractor);
        self
    }

    pub fn with_link(mut self, link: LinkFn) -> Self {
        self.link = link;
        self
    }

    pub fn ingest(
        &self,
        dataset: &WorkingDataset,
        input: &InputSource,
    ) -> Result<ArchiveArtifact, IndexerError> {
        let (path, method) = match input {
            InputSource::LocalDir(dir) => self.ingest_dir(dataset, dir)?,
            InputSource::LocalFile(file) => self.ingest_file(dataset, file)?,
            InputSource::Url(url) => {
                if !REMOTE_INPUT_SCHEMES.contains(&url.scheme()) {
                    return Err(IndexerError::UnsupportedScheme(url.scheme().to_string()));
                }
                let name = url
                    .path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                    .map(str::to_string)
                    .ok_or_else(|| IndexerError::InvalidPath(format!("no file name in {url}")))?;
                let relative = Utf8PathBuf::from(name);
                self.engine.add_url_source(dataset, &relative, url.as_str())?;
                (relative, IngestMethod::UrlSource)
            }
        };

        self.engine
            .save(dataset, &[path.clone()], ARCHIVE_COMMIT_MESSAGE)?;
        info!(artifact = %path, source = %input.describe(), "archive committed");

        if let Err(err) = self.engine.housekeeping(dataset) {
            warn!(%err, "housekeeping failed");
        }

        Ok(ArchiveArtifact {
            path,
            source: input.describe(),
            method,
            ingested_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn index_archive(
        &self,
        dataset: &WorkingDataset,
        artifact: &ArchiveArtifact,
    ) -> Result<(), IndexerError> {
        self.engine.add_archive_content(dataset, &artifact.path)?;
        self.engine.save(dataset, &[], INDEX_COMMIT_MESSAGE)?;
        if let Err(err) = self.engine.housekeeping(dataset) {
            warn!(%err, "housekeeping failed");
        }
        Ok(())
    }

    fn ingest_dir(
        &self,
        dataset: &WorkingDataset,
        dir: &Utf8Path,
    ) -> Result<(Utf8PathBuf, IngestMethod), IndexerError> {
        let stem = dir
            .file_name()
            .ok_or_else(|| IndexerError::InvalidPath(format!("no directory name in {dir}")))?;
        let relative = Utf8PathBuf::from(format!("{stem}.{}", self.compressor.extension()));
        let archive = dataset.join(&relative);

        let staging = match self.series {
            Some(extractor) => Some(stage_by_series(dir.as_std_path(), extractor)?),
            None => None,
        };
        let source = staging
            .as_ref()
            .map(|workdir| workdir.path().as_std_path())
            .unwrap_or(dir.as_std_path());

        if let Err(err) = self.compressor.compress(source, archive.as_std_path()) {
            if archive.as_std_path().exists() {
                let _ = fs::remove_file(archive.as_std_path());
            }
            return Err(err);
        }
        Ok((relative, IngestMethod::Compressed))
    }

    fn ingest_file(
        &self,
        dataset: &WorkingDataset,
        file: &Utf8Path,
    ) -> Result<(Utf8PathBuf, IngestMethod), IndexerError> {
        let name = file
            .file_name()
            .ok_or_else(|| IndexerError::InvalidPath(format!("no file name in {file}")))?;
        let relative = Utf8PathBuf::from(name);
        let dest = dataset.join(&relative);
        let method = fs_util::link_or_copy_with(file.as_std_path(), dest.as_std_path(), self.link)?;
        let method = match method {
            PlaceMethod::HardLink => IngestMethod::HardLink,
            PlaceMethod::Copy => IngestMethod::Copy,
        };
        Ok((relative, method))
    }
}

fn stage_by_series(
    dir: &Path,
    extractor: &dyn MetadataExtractor,
) -> Result<ScopedWorkdir, IndexerError> {
    let staging = ScopedWorkdir::acquire("dicom-indexer-series", false)?;
    let mut sorted = 0usize;
    for file in fs_util::walk_files(dir, &fs_util::DATASET_META_DIRS)? {
        let relative = file
            .strip_prefix(dir)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        let root = staging.path().as_std_path();
        let candidates = match (extractor.series_uid(&file), file.file_name()) {
            (Some(uid), Some(name)) => {
                sorted += 1;
                let series = root.join(crate::resolve::normalize_segment(&uid));
                vec![series.join(name), series.join(relative)]
            }
            _ => vec![root.join(relative)],
        };
        fs_util::link_or_copy(&file, &free_target(candidates))?;
    }
    debug!(sorted, staging = %staging.path(), "series staged");
    Ok(staging)
}

// first candidate not yet taken, else the last one with a numeric suffix
fn free_target(candidates: Vec<PathBuf>) -> PathBuf {
    let mut last = PathBuf::new();
    for candidate in candidates {
        if !candidate.exists() {
            return candidate;
        }
        last = candidate;
    }
    let name = last
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut index = 1usize;
    loop {
        let candidate = last.with_file_name(format!("{name}_{index}"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSeries;

    impl MetadataExtractor for FixedSeries {
        fn extract(
            &self,
            _files: &[PathBuf],
        ) -> Result<crate::domain::SessionMetadata, IndexerError> {
            Err(IndexerError::NoParsableMetadata("unused".to_string()))
        }

        fn series_uid(&self, file: &Path) -> Option<String> {
            let name = file.file_name()?.to_str()?;
            name.strip_suffix(".dcm")
                .and_then(|stem| stem.split('_').next())
                .map(|series| format!("1.2.{series}"))
        }
    }

    #[test]
    fn staging_groups_files_by_series_without_touching_input() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("7_0001.dcm"), b"a").unwrap();
        fs::write(temp.path().join("7_0002.dcm"), b"b").unwrap();
        fs::write(temp.path().join("9_0001.dcm"), b"c").unwrap();
        fs::write(temp.path().join("DICOMDIR"), b"d").unwrap();

        let staging = stage_by_series(temp.path(), &FixedSeries).unwrap();
        let root = staging.path().as_std_path();
        assert!(root.join("1.2.7/7_0001.dcm").is_file());
        assert!(root.join("1.2.7/7_0002.dcm").is_file());
        assert!(root.join("1.2.9/9_0001.dcm").is_file());
        assert!(root.join("DICOMDIR").is_file());
        assert!(temp.path().join("7_0001.dcm").is_file());
    }

    #[test]
    fn same_name_in_one_series_keeps_both_files() {
        let temp = tempfile::tempdir().unwrap();
        let input = temp.path().join("session");
        fs::create_dir_all(input.join("a")).unwrap();
        fs::create_dir_all(input.join("b")).unwrap();
        fs::write(input.join("a/4_0001.dcm"), b"first").unwrap();
        fs::write(input.join("b/4_0001.dcm"), b"second").unwrap();

        let staging = stage_by_series(&input, &FixedSeries).unwrap();
        let root = staging.path().as_std_path();
        assert_eq!(fs::read(root.join("1.2.4/4_0001.dcm")).unwrap(), b"first");
        assert_eq!(fs::read(root.join("1.2.4/b/4_0001.dcm")).unwrap(), b"second");

        let archive = temp.path().join("session.zip");
        ZipCompressor.compress(root, &archive).unwrap();
        assert_eq!(fs_util::validate_zip(&archive).unwrap(), 2);
    }

    #[test]
    fn free_target_suffixes_when_every_candidate_is_taken() {
        let temp = tempfile::tempdir().unwrap();
        let taken = temp.path().join("IM0001");
        fs::write(&taken, b"x").unwrap();
        assert_eq!(
            free_target(vec![taken.clone(), taken.clone()]),
            temp.path().join("IM0001_1")
        );
    }

    #[test]
    fn zip_compressor_writes_archive() {
        let temp = tempfile::tempdir().unwrap();
        let input = temp.path().join("session");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("1.dcm"), b"x").unwrap();
        let archive = temp.path().join("session.zip");
        ZipCompressor.compress(&input, &archive).unwrap();
        assert_eq!(fs_util::validate_zip(&archive).unwrap(), 1);
    }
}
