use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionKey {
    StudyInstanceUID,
    PatientID,
    PatientName,
    ReferringPhysicianName,
    StudyDate,
    StudyDescription,
}

impl SessionKey {
    pub const ALL: [SessionKey; 6] = [
        SessionKey::StudyInstanceUID,
        SessionKey::PatientID,
        SessionKey::PatientName,
        SessionKey::ReferringPhysicianName,
        SessionKey::StudyDate,
        SessionKey::StudyDescription,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            SessionKey::StudyInstanceUID => "StudyInstanceUID",
            SessionKey::PatientID => "PatientID",
            SessionKey::PatientName => "PatientName",
            SessionKey::ReferringPhysicianName => "ReferringPhysicianName",
            SessionKey::StudyDate => "StudyDate",
            SessionKey::StudyDescription => "StudyDescription",
        }
    }

    pub fn tag(&self) -> (u16, u16) {
        match self {
            SessionKey::StudyInstanceUID => (0x0020, 0x000D),
            SessionKey::PatientID => (0x0010, 0x0020),
            SessionKey::PatientName => (0x0010, 0x0010),
            SessionKey::ReferringPhysicianName => (0x0008, 0x0090),
            SessionKey::StudyDate => (0x0008, 0x0020),
            SessionKey::StudyDescription => (0x0008, 0x1030),
        }
    }

    pub fn from_tag(tag: (u16, u16)) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.tag() == tag)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

impl FromStr for SessionKey {
    type Err = IndexerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|key| key.keyword() == trimmed)
            .ok_or_else(|| IndexerError::MissingMetadataField(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    values: BTreeMap<SessionKey, String>,
}

impl SessionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: SessionKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: SessionKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: SessionKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn require(&self, key: SessionKey) -> Result<&str, IndexerError> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| IndexerError::MissingMetadataField(key.keyword().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ordered, non-empty group/group/.../leaf path on the remote directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HierarchyPath(Vec<String>);

impl HierarchyPath {
    pub fn new<I, S>(segments: I) -> Result<Self, IndexerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments.into_iter().map(Into::into).collect::<Vec<_>>();
        if segments.is_empty() {
            return Err(IndexerError::InvalidPath("empty path".to_string()));
        }
        for segment in &segments {
            if segment.is_empty() || segment.contains('/') || segment.contains('\\') {
                return Err(IndexerError::InvalidPath(format!(
                    "invalid segment {segment:?} in {}",
                    segments.join("/")
                )));
            }
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn leaf(&self) -> &str {
        // non-empty by construction
        &self.0[self.0.len() - 1]
    }

    pub fn parent(&self) -> Option<HierarchyPath> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn prefix_string(&self, len: usize) -> String {
        self.0[..len.min(self.0.len())].join("/")
    }

    pub fn child(&self, segment: &str) -> Result<HierarchyPath, IndexerError> {
        self.join(&HierarchyPath::from_str(segment)?)
    }

    pub fn join(&self, other: &HierarchyPath) -> Result<HierarchyPath, IndexerError> {
        Self::new(self.0.iter().chain(other.0.iter()).cloned())
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for HierarchyPath {
    type Err = IndexerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value.trim().trim_matches('/').split('/'))
    }
}

impl TryFrom<String> for HierarchyPath {
    type Error = IndexerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HierarchyPath> for String {
    fn from(value: HierarchyPath) -> Self {
        value.to_string()
    }
}

pub const REMOTE_INPUT_SCHEMES: [&str; 3] = ["http", "https", "s3"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    LocalDir(Utf8PathBuf),
    LocalFile(Utf8PathBuf),
    Url(Url),
}

impl InputSource {
    pub fn is_local(&self) -> bool {
        !matches!(self, InputSource::Url(_))
    }

    pub fn describe(&self) -> String {
        match self {
            InputSource::LocalDir(path) | InputSource::LocalFile(path) => path.to_string(),
            InputSource::Url(url) => url.to_string(),
        }
    }
}

impl FromStr for InputSource {
    type Err = IndexerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let path = if trimmed.contains("://") {
            let url = Url::parse(trimmed)
                .map_err(|err| IndexerError::UnsupportedScheme(format!("{trimmed}: {err}")))?;
            match url.scheme() {
                "file" => Utf8PathBuf::from(url.path()),
                scheme if REMOTE_INPUT_SCHEMES.contains(&scheme) => {
                    return Ok(InputSource::Url(url));
                }
                scheme => return Err(IndexerError::UnsupportedScheme(scheme.to_string())),
            }
        } else {
            Utf8PathBuf::from(trimmed)
        };

        let std_path = path.as_std_path();
        if std_path.is_dir() {
            Ok(InputSource::LocalDir(path))
        } else if std_path.is_file() {
            Ok(InputSource::LocalFile(path))
        } else {
            Err(IndexerError::Filesystem(format!("input not found: {path}")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageRemote {
    Store { url: String, name: String },
    ObjectStorage { bucket: String, prefix: String },
}

impl StorageRemote {
    pub fn name(&self) -> String {
        match self {
            StorageRemote::Store { name, .. } => name.clone(),
            StorageRemote::ObjectStorage { bucket, .. } => format!("s3-{bucket}"),
        }
    }
}

impl FromStr for StorageRemote {
    type Err = IndexerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let url = Url::parse(trimmed)
            .map_err(|err| IndexerError::UnsupportedScheme(format!("{trimmed}: {err}")))?;
        let scheme = url.scheme();
        if scheme.starts_with("ria+") {
            let name = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
                .or_else(|| url.host_str().map(str::to_string))
                .ok_or_else(|| IndexerError::Configuration(format!("store URL without a name: {trimmed}")))?;
            return Ok(StorageRemote::Store {
                url: trimmed.to_string(),
                name,
            });
        }
        if scheme == "s3" {
            let bucket = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| IndexerError::Configuration(format!("s3 URL without bucket: {trimmed}")))?
                .to_string();
            let prefix = url.path().trim_matches('/').to_string();
            return Ok(StorageRemote::ObjectStorage { bucket, prefix });
        }
        Err(IndexerError::UnsupportedScheme(scheme.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sibling {
    pub name: String,
    pub url: String,
}

impl Sibling {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    Nothing,
    Anything,
    Auto,
}

impl DataMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataMode::Nothing => "nothing",
            DataMode::Anything => "anything",
            DataMode::Auto => "auto",
        }
    }
}
