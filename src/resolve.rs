use camino::Utf8PathBuf;
use regex::Regex;
use serde::Serialize;

use crate::config::IndexerConfig;
use crate::domain::{HierarchyPath, SessionKey, SessionMetadata};
use crate::error::IndexerError;

// separator some DICOM fields (person names, descriptions) embed between components
const COMPONENT_SEPARATOR: char = '^';

pub const SOURCEDATA_SEGMENTS: [&str; 2] = ["sourcedata", "dicoms"];
pub const STUDY_PROJECT: &str = "study";
pub const BIDS_PROJECT: &str = "bids";
pub const SHARED_SUBGROUPS: [&str; 2] = ["derivatives", "qc"];

#[derive(Debug, Clone)]
pub struct PathResolver {
    template: String,
    keys: Vec<SessionKey>,
    placeholder: Regex,
}

impl PathResolver {
    pub fn new(template: &str) -> Result<Self, IndexerError> {
        let placeholder = Regex::new(r"\{([A-Za-z0-9_]+)\}")
            .map_err(|err| IndexerError::Configuration(err.to_string()))?;
        let keys = placeholder
            .captures_iter(template)
            .map(|caps| caps[1].parse::<SessionKey>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            template: template.to_string(),
            keys,
            placeholder,
        })
    }

    pub fn resolve(&self, metadata: &SessionMetadata) -> Result<HierarchyPath, IndexerError> {
        for key in &self.keys {
            let value = metadata.require(*key)?;
            // a value must contribute at least one segment after normalization
            let usable = value
                .replace(COMPONENT_SEPARATOR, "/")
                .split('/')
                .any(|component| !normalize_segment(component).is_empty());
            if !usable {
                return Err(IndexerError::MissingMetadataField(key.keyword().to_string()));
            }
        }

        let mut segments = Vec::new();
        for part in self.template.split('/') {
            let rendered = self.placeholder.replace_all(part, |caps: &regex::Captures| {
                caps[1]
                    .parse::<SessionKey>()
                    .ok()
                    .and_then(|key| metadata.get(key))
                    .map(|value| value.trim().replace(COMPONENT_SEPARATOR, "/"))
                    .unwrap_or_default()
            });
            segments.extend(
                rendered
                    .split('/')
                    .map(normalize_segment)
                    .filter(|segment| !segment.is_empty()),
            );
        }

        if segments.is_empty() {
            return Err(IndexerError::InvalidPath(format!(
                "template {} resolved to an empty path",
                self.template
            )));
        }
        HierarchyPath::new(segments)
    }
}

pub fn normalize_segment(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut last_was_underscore = false;
    for ch in trimmed.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_') {
            ch
        } else {
            '_'
        };
        if mapped == '_' && last_was_underscore {
            continue;
        }
        last_was_underscore = mapped == '_';
        out.push(mapped);
    }
    out.trim_matches(|ch| ch == '_' || ch == '.').to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionLayout {
    pub session_id: String,
    pub study_group: HierarchyPath,
    pub sourcedata_group: HierarchyPath,
    pub session_project: HierarchyPath,
    pub study_project: HierarchyPath,
    pub bids_project: HierarchyPath,
    pub shared_groups: Vec<HierarchyPath>,
    pub session_subpath: Utf8PathBuf,
}

impl SessionLayout {
    pub fn derive(config: &IndexerConfig, metadata: &SessionMetadata) -> Result<Self, IndexerError> {
        let study_group = PathResolver::new(&config.group_template)?.resolve(metadata)?;
        let subpath = PathResolver::new(&config.session_subpath_template)?.resolve(metadata)?;

        let session_id = normalize_segment(metadata.require(config.session_tag)?);
        if session_id.is_empty() {
            return Err(IndexerError::MissingMetadataField(
                config.session_tag.keyword().to_string(),
            ));
        }

        let sourcedata_group = study_group.join(&HierarchyPath::new(SOURCEDATA_SEGMENTS)?)?;
        let session_project = sourcedata_group.child(&session_id)?;
        let study_project = sourcedata_group.child(STUDY_PROJECT)?;
        let bids_project = study_group.child(BIDS_PROJECT)?;
        let shared_groups = SHARED_SUBGROUPS
            .iter()
            .map(|name| study_group.child(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            session_id,
            study_group,
            sourcedata_group,
            session_project,
            study_project,
            bids_project,
            shared_groups,
            session_subpath: Utf8PathBuf::from(subpath.to_string()),
        })
    }
}
