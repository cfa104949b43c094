//! Error taxonomy shared by the pipeline, the store and the import layer.

use thiserror::Error;

use crate::model::RowId;
use crate::pipeline::eligibility::IneligibleReason;
use crate::pipeline::stage::Stage;

/// Failure of one unit of stage work. Cancellation is not an error; see
/// [`crate::pipeline::processor::StageOutcome::Cancelled`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Malformed input to a stage or to an edit.
    #[error("validation error: {0}")]
    Validation(String),

    /// An external collaborator threw or returned a failure.
    #[error("{stage} collaborator failed: {message}")]
    Collaborator { stage: Stage, message: String },

    /// The vectorization or structuring collaborator failed.
    #[error("vector processing failed: {0}")]
    Vector(String),

    #[error("row {0} not found")]
    RowNotFound(RowId),

    #[error("not eligible for vector structuring: {0}")]
    Ineligible(IneligibleReason),
}

impl StageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Keeps the whole context chain of the collaborator error.
    #[must_use]
    pub fn collaborator(stage: Stage, error: &anyhow::Error) -> Self {
        Self::Collaborator {
            stage,
            message: format!("{error:#}"),
        }
    }
}

/// A rejected import. The working set is left untouched.
#[derive(Debug, Error, PartialEq)]
pub enum ImportError {
    #[error("malformed workspace document: {0}")]
    Malformed(String),

    #[error("unsupported workspace document version {0}")]
    UnsupportedVersion(u32),

    #[error("row {index} has an empty identity")]
    MissingIdentity { index: usize },

    #[error("duplicate row identity {0}")]
    DuplicateIdentity(RowId),

    #[error("import contains no phrases")]
    Empty,

    #[error("failed to read {path}: {message}")]
    Unreadable { path: String, message: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage quota exceeded writing {key}: {needed} bytes needed, {quota} allowed")]
    CapacityExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn collaborator_error_keeps_context_chain() {
        let error = Err::<(), _>(anyhow!("503 Service Unavailable"))
            .context("rendering request failed")
            .expect_err("is an error");
        let stage_error = StageError::collaborator(Stage::Rendering, &error);
        assert_eq!(
            stage_error.to_string(),
            "rendering collaborator failed: rendering request failed: 503 Service Unavailable"
        );
    }
}
