//! Phrase lists and workspace documents.
//!
//! Every parse either yields a complete batch or an [`ImportError`]; rows are
//! never created from a partially valid file.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rows::validate_rows;
use crate::error::ImportError;
use crate::model::{GlobalConfig, Row};

pub const DOCUMENT_VERSION: u32 = 1;

/// Version reported for a bare row array.
pub const LEGACY_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<GlobalConfig>,
    pub rows: Vec<Row>,
}

impl WorkspaceDocument {
    #[must_use]
    pub fn new(rows: Vec<Row>, config: GlobalConfig) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            config: Some(config),
            rows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSource {
    /// One utterance per line.
    Phrases,
    /// JSON workspace document or legacy row array.
    Workspace,
}

impl ImportSource {
    /// A workspace document is an object or an array of row objects, so
    /// the first two tokens decide. A phrase list whose first line starts
    /// with a bracket (`[saludo] Hola`) stays a phrase list.
    #[must_use]
    pub fn detect(text: &str) -> Self {
        let mut tokens = text.chars().filter(|c| !c.is_whitespace());
        match (tokens.next(), tokens.next()) {
            (Some('{'), Some('"' | '}')) | (Some('['), Some('{' | ']')) => {
                ImportSource::Workspace
            }
            _ => ImportSource::Phrases,
        }
    }
}

/// Trimmed non-blank lines, in order.
#[must_use]
pub fn parse_phrases(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// # Errors
/// Malformed JSON, an unsupported version, or any row without a usable
/// identity rejects the whole document.
pub fn parse_document(text: &str) -> Result<WorkspaceDocument, ImportError> {
    let value: Value =
        serde_json::from_str(text).map_err(|error| ImportError::Malformed(error.to_string()))?;

    let (version, config, rows) = match value {
        Value::Array(rows) => (LEGACY_VERSION, None, rows),
        Value::Object(mut object) => {
            let version = object
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| ImportError::Malformed("missing numeric `version`".to_string()))?;
            let version = u32::try_from(version).unwrap_or(u32::MAX);
            if version > DOCUMENT_VERSION {
                return Err(ImportError::UnsupportedVersion(version));
            }
            let config = match object.remove("config") {
                None | Some(Value::Null) => None,
                Some(config) => Some(
                    serde_json::from_value::<GlobalConfig>(config)
                        .map_err(|error| ImportError::Malformed(format!("config: {error}")))?,
                ),
            };
            let rows = match object.remove("rows") {
                Some(Value::Array(rows)) => rows,
                _ => return Err(ImportError::Malformed("missing `rows` array".to_string())),
            };
            (version, config, rows)
        }
        _ => {
            return Err(ImportError::Malformed(
                "expected an object or an array of rows".to_string(),
            ));
        }
    };

    let rows = decode_rows(rows)?;
    validate_rows(&rows)?;
    Ok(WorkspaceDocument {
        version,
        config,
        rows,
    })
}

fn decode_rows(values: Vec<Value>) -> Result<Vec<Row>, ImportError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let has_identity = value
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| !id.trim().is_empty());
            if !has_identity {
                return Err(ImportError::MissingIdentity { index });
            }
            let mut row: Row = serde_json::from_value(value)
                .map_err(|error| ImportError::Malformed(format!("row {index}: {error}")))?;
            row.refresh_status();
            Ok(row)
        })
        .collect()
}

/// # Errors
/// Only if a payload fails to serialize.
pub fn export_document(rows: &[Row], config: &GlobalConfig) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&WorkspaceDocument::new(rows.to_vec(), config.clone()))
}
