use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::ModelKind;

/// The opened exposure does not have the array layout a consumer needs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("expected a {expected} model, got a {found} model")]
    WrongKind { expected: ModelKind, found: ModelKind },

    #[error("{kind} model needs a {expected}-D array, got {found}-D")]
    WrongRank {
        kind: ModelKind,
        expected: usize,
        found: usize,
    },

    #[error("array shape {found:?} does not match {expected:?}")]
    Mismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown step '{0}' in step list")]
    UnknownStep(String),

    #[error("pipeline has no '{0}' step registered")]
    MissingStep(String),

    #[error("step '{step}' cannot be used as {capability}")]
    NotCapable {
        step: String,
        capability: &'static str,
    },

    #[error("wrong data model shape: {0}")]
    Shape(#[from] ShapeError),

    #[error("unsupported file extension: .{0}")]
    UnsupportedFormat(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no science member found in product '{0}'")]
    NoScienceMember(String),

    #[error("invalid value for {step}.{key}: {reason}")]
    InvalidParameter {
        step: String,
        key: String,
        reason: String,
    },

    #[error("association error: {0}")]
    Association(String),

    #[error("step '{step}' failed: {reason}")]
    Step { step: String, reason: String },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
