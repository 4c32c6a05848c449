use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IndexerError {
    #[error("configuration error: {0}")]
    #[diagnostic(help("check dicom-indexer.json and the command line flags"))]
    Configuration(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("session metadata field missing or empty: {0}")]
    MissingMetadataField(String),

    #[error("no parsable DICOM metadata found in {0}")]
    NoParsableMetadata(String),

    #[error("invalid hierarchy path: {0}")]
    InvalidPath(String),

    #[error("remote directory unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote directory returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("remote resource already exists: {0}")]
    AlreadyExists(String),

    #[error("ambiguous remote path {path}: {matches} resources share it")]
    #[diagnostic(help("rename or remove the duplicate resource on the remote"))]
    AmbiguousName { path: String, matches: usize },

    #[error("path already occupied in parent dataset: {0}")]
    PathCollision(String),

    #[error("export to {remote} incomplete: {detail}")]
    ExportIncomplete { remote: String, detail: String },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("unknown identity on remote: {0}")]
    UnknownIdentity(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl IndexerError {
    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::Configuration(_)
            | IndexerError::ConfigRead(_)
            | IndexerError::ConfigParse(_) => "configuration_error",
            IndexerError::MissingMetadataField(_) => "missing_metadata_field",
            IndexerError::NoParsableMetadata(_) => "no_parsable_metadata",
            IndexerError::InvalidPath(_) => "invalid_path",
            IndexerError::RemoteUnavailable(_) | IndexerError::RemoteStatus { .. } => {
                "remote_unavailable"
            }
            IndexerError::AlreadyExists(_) => "already_exists",
            IndexerError::AmbiguousName { .. } => "ambiguous_name",
            IndexerError::PathCollision(_) => "path_collision",
            IndexerError::ExportIncomplete { .. } => "export_incomplete",
            IndexerError::UnsupportedScheme(_) => "unsupported_scheme",
            IndexerError::UnknownIdentity(_) => "unknown_identity",
            IndexerError::MissingTool(_) => "missing_tool",
            IndexerError::ToolFailed { .. } => "tool_failed",
            IndexerError::Dataset(_) => "dataset_error",
            IndexerError::Filesystem(_) => "filesystem_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            IndexerError::RemoteUnavailable(_) | IndexerError::ExportIncomplete { .. } => true,
            IndexerError::RemoteStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}
