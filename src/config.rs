use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::domain::{SessionKey, StorageRemote};
use crate::error::IndexerError;

pub const CONFIG_FILE_NAME: &str = "dicom-indexer.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[serde(rename = "7z")]
    SevenZip,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Zip => "zip",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_archive_format")]
    pub format: ArchiveFormat,
    #[serde(default = "default_compression_options")]
    pub options: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            format: default_archive_format(),
            options: default_compression_options(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_s3_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_s3_protocol")]
    pub protocol: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            host: default_s3_host(),
            port: None,
            protocol: default_s3_protocol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub gitlab_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub gitlab_token: Option<String>,
    #[serde(default)]
    pub bot_username: Option<String>,
    #[serde(default = "default_remote_name")]
    pub gitlab_remote_name: String,
    #[serde(default = "default_true")]
    pub use_ssh_urls: bool,
    #[serde(default = "default_group_template")]
    pub group_template: String,
    #[serde(default = "default_session_tag")]
    pub session_tag: SessionKey,
    #[serde(default = "default_session_subpath_template")]
    pub session_subpath_template: String,
    #[serde(default)]
    pub storage_remote: Option<String>,
    #[serde(default)]
    pub study_store_url: Option<String>,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default = "default_true")]
    pub sort_series: bool,
    #[serde(default)]
    pub fake_dates: bool,
    #[serde(default)]
    pub force_export: bool,
    #[serde(default)]
    pub keep_workdir: bool,
    #[serde(default)]
    pub study_template_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub bids_template_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,
    #[serde(default = "default_conversion_branch_pattern")]
    pub conversion_branch_pattern: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            gitlab_url: None,
            gitlab_token: None,
            bot_username: None,
            gitlab_remote_name: default_remote_name(),
            use_ssh_urls: true,
            group_template: default_group_template(),
            session_tag: default_session_tag(),
            session_subpath_template: default_session_subpath_template(),
            storage_remote: None,
            study_store_url: None,
            compression: CompressionConfig::default(),
            sort_series: true,
            fake_dates: false,
            force_export: false,
            keep_workdir: false,
            study_template_dir: None,
            bids_template_dir: None,
            s3: S3Config::default(),
            integration_branch: default_integration_branch(),
            conversion_branch_pattern: default_conversion_branch_pattern(),
        }
    }
}

impl IndexerConfig {
    pub fn load(path: Option<&str>) -> Result<Self, IndexerError> {
        let candidate = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_config_paths().into_iter().find(|path| path.exists()),
        };
        let Some(config_path) = candidate else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IndexerError::ConfigRead(config_path.display().to_string()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, IndexerError> {
        serde_json::from_str(content).map_err(|err| IndexerError::ConfigParse(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        self.gitlab_base_url()?;
        self.token()?;
        self.bot_identity()?;
        if self.gitlab_remote_name.trim().is_empty() {
            return Err(IndexerError::Configuration(
                "gitlab_remote_name must not be empty".to_string(),
            ));
        }
        self.storage()?;
        if let Some(url) = &self.study_store_url {
            match url.parse::<StorageRemote>()? {
                StorageRemote::Store { .. } => {}
                StorageRemote::ObjectStorage { .. } => {
                    return Err(IndexerError::Configuration(
                        "study_store_url must be a ria+ store URL".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn gitlab_base_url(&self) -> Result<Url, IndexerError> {
        let raw = self
            .gitlab_url
            .as_deref()
            .ok_or_else(|| IndexerError::Configuration("gitlab_url is required".to_string()))?;
        let url = Url::parse(raw)
            .map_err(|err| IndexerError::Configuration(format!("invalid gitlab_url {raw}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IndexerError::Configuration(format!(
                "gitlab_url must be http(s): {raw}"
            )));
        }
        Ok(url)
    }

    pub fn token(&self) -> Result<&str, IndexerError> {
        self.gitlab_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| IndexerError::Configuration("gitlab token is required".to_string()))
    }

    pub fn bot_identity(&self) -> Result<&str, IndexerError> {
        self.bot_username
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| IndexerError::Configuration("bot_username is required".to_string()))
    }

    pub fn storage(&self) -> Result<Option<StorageRemote>, IndexerError> {
        self.storage_remote
            .as_deref()
            .map(str::parse::<StorageRemote>)
            .transpose()
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = BaseDirs::new() {
        paths.push(dirs.config_dir().join("dicom-indexer").join("config.json"));
    }
    paths
}

fn default_true() -> bool {
    true
}

fn default_remote_name() -> String {
    "gitlab".to_string()
}

fn default_group_template() -> String {
    "{ReferringPhysicianName}/{StudyDescription}".to_string()
}

fn default_session_tag() -> SessionKey {
    SessionKey::StudyInstanceUID
}

fn default_session_subpath_template() -> String {
    "{PatientID}/{StudyInstanceUID}".to_string()
}

fn default_archive_format() -> ArchiveFormat {
    ArchiveFormat::SevenZip
}

pub fn default_compression_options() -> Vec<String> {
    vec!["-mx5".to_string()]
}

fn default_s3_host() -> String {
    "s3.amazonaws.com".to_string()
}

fn default_s3_protocol() -> String {
    "https".to_string()
}

fn default_integration_branch() -> String {
    "dev".to_string()
}

fn default_conversion_branch_pattern() -> String {
    "convert/*".to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = IndexerConfig::from_json("{}").unwrap();
        assert_eq!(config.gitlab_remote_name, "gitlab");
        assert_eq!(config.session_tag, SessionKey::StudyInstanceUID);
        assert_eq!(config.compression.format, ArchiveFormat::SevenZip);
        assert_eq!(config.compression.options, default_compression_options());
        assert!(config.sort_series);
        assert_eq!(config.conversion_branch_pattern, "convert/*");
    }

    #[test]
    fn validate_requires_token_before_anything_remote() {
        let config = IndexerConfig::from_json(
            r#"{"gitlab_url": "https://gitlab.example.org", "bot_username": "indexer-bot"}"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert_matches!(err, IndexerError::Configuration(msg) if msg.contains("token"));
    }

    #[test]
    fn validate_rejects_unknown_storage_scheme() {
        let mut config = IndexerConfig::from_json(
            r#"{"gitlab_url": "https://gitlab.example.org", "bot_username": "indexer-bot", "storage_remote": "ftp://x/y"}"#,
        )
        .unwrap();
        config.gitlab_token = Some("secret".to_string());
        let err = config.validate().unwrap_err();
        assert_matches!(err, IndexerError::UnsupportedScheme(_));
    }
}
