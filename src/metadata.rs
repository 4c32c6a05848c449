use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::debug;

use crate::dataset::find_in_path;
use crate::domain::{SessionKey, SessionMetadata};
use crate::error::IndexerError;

const SERIES_INSTANCE_UID: (u16, u16) = (0x0020, 0x000E);

pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, files: &[PathBuf]) -> Result<SessionMetadata, IndexerError>;
    fn series_uid(&self, file: &Path) -> Option<String>;
}

#[derive(Clone)]
pub struct DcmdumpExtractor {
    dcmdump: Option<PathBuf>,
    line: Regex,
}

impl DcmdumpExtractor {
    pub fn new() -> Result<Self, IndexerError> {
        let line = Regex::new(r"^\(([0-9A-Fa-f]{4}),([0-9A-Fa-f]{4})\)\s+[A-Z]{2}\s+\[(.*?)\]")
            .map_err(|err| IndexerError::Configuration(err.to_string()))?;
        Ok(Self {
            dcmdump: find_in_path("dcmdump"),
            line,
        })
    }

    fn dump(&self, file: &Path, tags: &[(u16, u16)]) -> Result<Option<String>, IndexerError> {
        let dcmdump = self
            .dcmdump
            .as_ref()
            .ok_or_else(|| IndexerError::MissingTool("dcmdump".to_string()))?;
        let mut cmd = Command::new(dcmdump);
        cmd.arg("-q");
        for (group, element) in tags {
            cmd.arg("+P").arg(format!("{group:04x},{element:04x}"));
        }
        cmd.arg(file);
        let output = cmd.output().map_err(|err| IndexerError::ToolFailed {
            tool: "dcmdump".to_string(),
            message: err.to_string(),
        })?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
    }

    pub fn parse_dump(&self, output: &str) -> Vec<((u16, u16), String)> {
        output
            .lines()
            .filter_map(|line| {
                let caps = self.line.captures(line.trim())?;
                let group = u16::from_str_radix(&caps[1], 16).ok()?;
                let element = u16::from_str_radix(&caps[2], 16).ok()?;
                Some(((group, element), caps[3].trim().to_string()))
            })
            .collect()
    }

    pub fn metadata_from_dump(&self, output: &str) -> SessionMetadata {
        let mut metadata = SessionMetadata::new();
        for (tag, value) in self.parse_dump(output) {
            if let Some(key) = SessionKey::from_tag(tag) {
                metadata.insert(key, value);
            }
        }
        metadata
    }
}

impl MetadataExtractor for DcmdumpExtractor {
    fn extract(&self, files: &[PathBuf]) -> Result<SessionMetadata, IndexerError> {
        let tags = SessionKey::ALL.map(|key| key.tag());
        for file in files {
            let Some(output) = self.dump(file, &tags)? else {
                debug!(file = %file.display(), "not a DICOM file");
                continue;
            };
            let metadata = self.metadata_from_dump(&output);
            if !metadata.is_empty() {
                return Ok(metadata);
            }
        }
        let scope = files
            .first()
            .and_then(|file| file.parent())
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "<no files>".to_string());
        Err(IndexerError::NoParsableMetadata(scope))
    }

    fn series_uid(&self, file: &Path) -> Option<String> {
        let output = self.dump(file, &[SERIES_INSTANCE_UID]).ok()??;
        self.parse_dump(&output)
            .into_iter()
            .find(|(tag, value)| *tag == SERIES_INSTANCE_UID && !value.is_empty())
            .map(|(_, value)| value)
    }
}
