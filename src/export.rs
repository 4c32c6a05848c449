use serde::Serialize;
use tracing::{info, warn};

use crate::config::S3Config;
use crate::dataset::{ContentFilter, DatasetEngine, FsckReport, WorkingDataset};
use crate::domain::{DataMode, StorageRemote};
use crate::error::IndexerError;

pub const S3_CHUNK_SIZE: &str = "1GiB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Store,
    ObjectStorage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRecord {
    pub remote: String,
    pub kind: ExportKind,
    pub content_transferred: bool,
    pub verified: bool,
    pub checked: usize,
}

#[derive(Debug, Clone)]
pub struct ExportScope {
    pub study_path: String,
    pub session_id: String,
}

pub struct ExportPipeline<'a, E: DatasetEngine> {
    engine: &'a E,
    s3: &'a S3Config,
}

impl<'a, E: DatasetEngine> ExportPipeline<'a, E> {
    pub fn new(engine: &'a E, s3: &'a S3Config) -> Self {
        Self { engine, s3 }
    }

    pub fn export(
        &self,
        dataset: &WorkingDataset,
        remote: &StorageRemote,
        scope: &ExportScope,
        push_content: bool,
    ) -> Result<ExportRecord, IndexerError> {
        match remote {
            StorageRemote::Store { url, name } => {
                self.export_to_store(dataset, url, name, scope, push_content)
            }
            StorageRemote::ObjectStorage { bucket, prefix } => {
                self.export_to_object_storage(dataset, remote, bucket, prefix, scope, push_content)
            }
        }
    }

    fn export_to_store(
        &self,
        dataset: &WorkingDataset,
        url: &str,
        name: &str,
        scope: &ExportScope,
        push_content: bool,
    ) -> Result<ExportRecord, IndexerError> {
        self.engine
            .create_store_sibling(dataset, url, name, &scope.session_id)?;
        self.engine.push(dataset, name, DataMode::Nothing)?;
        info!(remote = name, "history published to store");

        let mut record = ExportRecord {
            remote: name.to_string(),
            kind: ExportKind::Store,
            content_transferred: false,
            verified: false,
            checked: 0,
        };
        if !push_content {
            return Ok(record);
        }

        self.engine.push(dataset, name, DataMode::Anything)?;
        record.content_transferred = true;

        let storage = format!("{name}-storage");
        let report = self.verify(dataset, &storage, &ContentFilter::all())?;
        record.checked = report.checked;
        record.verified = true;

        // publishes the refreshed availability information
        self.engine.push(dataset, name, DataMode::Nothing)?;
        info!(remote = name, checked = report.checked, "store export verified");
        Ok(record)
    }

    fn export_to_object_storage(
        &self,
        dataset: &WorkingDataset,
        remote: &StorageRemote,
        bucket: &str,
        prefix: &str,
        scope: &ExportScope,
        push_content: bool,
    ) -> Result<ExportRecord, IndexerError> {
        let name = remote.name();
        let mut record = ExportRecord {
            remote: name.clone(),
            kind: ExportKind::ObjectStorage,
            content_transferred: false,
            verified: false,
            checked: 0,
        };
        let params = self.object_storage_params(bucket, prefix, scope);
        self.engine.init_special_remote(dataset, &name, &params)?;
        let filter = ContentFilter::archives();
        self.engine
            .set_wanted(dataset, &name, &filter.preferred_content())?;
        if !push_content {
            info!(remote = %name, "object storage configured, content not pushed");
            return Ok(record);
        }

        self.engine.push(dataset, &name, DataMode::Auto)?;
        record.content_transferred = true;

        let report = self.verify(dataset, &name, &filter)?;
        record.checked = report.checked;
        record.verified = true;
        info!(remote = %name, checked = report.checked, "object storage export verified");
        Ok(record)
    }

    pub fn object_storage_params(
        &self,
        bucket: &str,
        prefix: &str,
        scope: &ExportScope,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("type".to_string(), "S3".to_string()),
            ("encryption".to_string(), "none".to_string()),
            ("requeststyle".to_string(), "path".to_string()),
            ("chunk".to_string(), S3_CHUNK_SIZE.to_string()),
            ("bucket".to_string(), bucket.to_string()),
            ("fileprefix".to_string(), session_key_prefix(prefix, scope)),
            ("host".to_string(), self.s3.host.clone()),
            ("protocol".to_string(), self.s3.protocol.clone()),
            ("autoenable".to_string(), "true".to_string()),
        ];
        if let Some(port) = self.s3.port {
            params.push(("port".to_string(), port.to_string()));
        }
        params
    }

    fn verify(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        filter: &ContentFilter,
    ) -> Result<FsckReport, IndexerError> {
        let present = self.engine.present_content(dataset, filter)?;
        let report = self.engine.verify_remote(dataset, remote, filter)?;
        if !report.failed.is_empty() {
            warn!(remote, missing = report.failed.len(), "remote is missing content");
            return Err(IndexerError::ExportIncomplete {
                remote: remote.to_string(),
                detail: format!(
                    "{} of {} files missing: {}",
                    report.failed.len(),
                    report.checked,
                    report.failed.join(", ")
                ),
            });
        }
        if report.checked < present {
            warn!(remote, checked = report.checked, present, "verification did not cover all content");
            return Err(IndexerError::ExportIncomplete {
                remote: remote.to_string(),
                detail: format!(
                    "verification covered {} of {present} present files",
                    report.checked
                ),
            });
        }
        Ok(report)
    }
}

// `<prefix>/<study path>/<session id>/`, never the bucket root
pub fn session_key_prefix(prefix: &str, scope: &ExportScope) -> String {
    let mut parts = Vec::new();
    for part in [prefix, scope.study_path.as_str(), scope.session_id.as_str()] {
        let trimmed = part.trim_matches('/');
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }
    format!("{}/", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefix_is_scoped_per_session() {
        let scope = ExportScope {
            study_path: "Smith/Jane/Brain".to_string(),
            session_id: "1.2.3".to_string(),
        };
        assert_eq!(session_key_prefix("raw/", &scope), "raw/Smith/Jane/Brain/1.2.3/");
        assert_eq!(session_key_prefix("", &scope), "Smith/Jane/Brain/1.2.3/");
    }
}
