use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StageError;
use crate::util::json::strip_code_fences;

/// Structured semantic analysis of an utterance.
///
/// Only `frames` is named; everything else the analysis service returns is
/// carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(default)]
    pub frames: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisRecord {
    #[must_use]
    pub fn with_frames(frames: Vec<Value>) -> Self {
        Self {
            frames,
            extra: Map::new(),
        }
    }

    /// Parses analysis text (optionally wrapped in a markdown code fence).
    ///
    /// # Errors
    /// Returns [`StageError::Validation`] when the text is not a JSON object.
    pub fn from_text(text: &str) -> Result<Self, StageError> {
        let body = strip_code_fences(text);
        if body.is_empty() {
            return Err(StageError::validation("analysis text is empty"));
        }
        serde_json::from_str::<Self>(body)
            .map_err(|error| StageError::validation(format!("analysis is not valid JSON: {error}")))
    }
}

/// Analysis as stored on a row: either parsed, or raw text awaiting a parse
/// (as typed by the user or returned verbatim by the model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisPayload {
    Parsed(AnalysisRecord),
    Raw(String),
}

impl AnalysisPayload {
    #[must_use]
    pub fn as_record(&self) -> Option<&AnalysisRecord> {
        match self {
            AnalysisPayload::Parsed(record) => Some(record),
            AnalysisPayload::Raw(_) => None,
        }
    }

    #[must_use]
    pub fn is_parsed(&self) -> bool {
        matches!(self, AnalysisPayload::Parsed(_))
    }

    /// Normalizes to a parsed record.
    ///
    /// # Errors
    /// Returns [`StageError::Validation`] when raw text does not parse.
    pub fn to_record(&self) -> Result<AnalysisRecord, StageError> {
        match self {
            AnalysisPayload::Parsed(record) => Ok(record.clone()),
            AnalysisPayload::Raw(text) => AnalysisRecord::from_text(text),
        }
    }
}
