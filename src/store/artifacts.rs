use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::RowId;

/// Structured vector output of the optional structuring stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredVector {
    pub svg: String,
    pub created_at: DateTime<Utc>,
}

/// Structured vectors keyed by row, persisted apart from the rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactLibrary {
    entries: BTreeMap<RowId, StructuredVector>,
}

impl ArtifactLibrary {
    #[must_use]
    pub fn get(&self, id: &RowId) -> Option<&StructuredVector> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, id: RowId, svg: impl Into<String>) -> &StructuredVector {
        let entry = StructuredVector {
            svg: svg.into(),
            created_at: Utc::now(),
        };
        self.entries.insert(id.clone(), entry);
        &self.entries[&id]
    }

    pub fn remove(&mut self, id: &RowId) -> Option<StructuredVector> {
        self.entries.remove(id)
    }

    /// Drops entries whose row no longer exists.
    pub fn retain_rows(&mut self, live: &[RowId]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| live.contains(id));
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
