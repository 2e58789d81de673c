use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while scanning alignments and persisting aggregated rows.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing index for {kind}, expected: {}", expected.display())]
    MissingIndex { kind: &'static str, expected: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BAM error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("Reference genome error: {0}")]
    Reference(String),

    #[error("Improper sequence name format: {0}")]
    UnknownSequence(String),

    #[error("Invalid value for setting {key}: {value}")]
    InvalidSetting { key: String, value: String },

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Not supported for this aggregator: {0}")]
    Unsupported(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Progress display error: {0}")]
    Progress(#[from] indicatif::style::TemplateError),
}

impl From<tempfile::PersistError> for PipelineError {
    fn from(err: tempfile::PersistError) -> Self {
        PipelineError::Io(err.error)
    }
}
