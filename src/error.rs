//! Error handling for RU container decoding.
//!
//! Structural faults (bad magic, missing terminator, corrupt body, missing
//! subtree) abort decoding of a single container. Per-value problems never
//! surface here; they degrade to NaN in the normalizer.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuError {
    #[error("Container format error: {0}")]
    Format(#[from] FormatError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Could not resolve latitude/longitude: {reason}")]
    GeoResolution { reason: String },

    #[error("Variable resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Dataset not found at path: {path}")]
    DatasetNotFound { path: PathBuf },

    #[error("Processing failed for {path}: {reason}")]
    ProcessingFailed { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("input does not start with the RU magic prefix")]
    NotAContainer,

    #[error("header terminator 0x04 0x1A not found")]
    MissingTerminator,

    #[error("header line {line} could not be decoded: {reason}")]
    HeaderDecode { line: usize, reason: String },

    #[error("unsupported container mode (format={format:?}, compress_type={compress_type:?})")]
    UnsupportedContainerMode {
        format: Option<String>,
        compress_type: Option<String>,
    },

    #[error("body could not be decompressed: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("malformed node tree at byte {offset}: {reason}")]
    MalformedTree { offset: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("missing field '{name}'")]
    MissingField { name: String },

    #[error("invalid field '{name}': {reason}")]
    InvalidField { name: String, reason: String },

    #[error("container carries GeoJSON, not observation data")]
    NotObservationData,
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("unknown variable '{query}'")]
    UnknownVariable { query: String },

    #[error("dataset has no columns {columns:?}")]
    MissingColumns { columns: Vec<String> },
}

impl RuError {
    pub fn geo(reason: impl Into<String>) -> Self {
        Self::GeoResolution {
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::Schema(SchemaError::MissingField { name: name.into() })
    }

    pub fn invalid_field(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema(SchemaError::InvalidField {
            name: name.into(),
            reason: reason.into(),
        })
    }

    pub fn malformed_tree(offset: usize, reason: impl Into<String>) -> Self {
        Self::Format(FormatError::MalformedTree {
            offset,
            reason: reason.into(),
        })
    }

    pub fn unknown_variable(query: impl Into<String>) -> Self {
        Self::Resolution(ResolutionError::UnknownVariable {
            query: query.into(),
        })
    }

    /// True for faults in the container itself rather than in its surroundings
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Format(_) | Self::Schema(_))
    }
}

pub type Result<T> = std::result::Result<T, RuError>;
