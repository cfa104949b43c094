use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::model::{Row, RowId, RowPatch, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Case-insensitive utterance, ascending.
    #[default]
    Alphabetical,
    /// Completed stages (analysis, composition, rendering, evaluation), most first.
    Completeness,
    /// Aggregate evaluation score, best first; unevaluated rows last.
    EvaluationScore,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Case-insensitive substring of the utterance.
    pub text: Option<String>,
    /// Overall row status.
    pub status: Option<StageStatus>,
    pub sort: SortKey,
}

impl ListQuery {
    #[must_use]
    pub fn sorted_by(sort: SortKey) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matching(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Ordered collection of rows; the only place rows are created, changed or
/// removed.
///
/// `update` on an unknown id is a silent no-op, and concurrent updates are
/// last-write-wins per field.
#[derive(Debug, Clone, Default)]
pub struct RowStore {
    rows: Vec<Row>,
}

impl RowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Rejects rows with empty or duplicate identities.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self, ImportError> {
        let mut store = Self::new();
        store.replace_all(rows)?;
        Ok(store)
    }

    pub fn create(&mut self, utterance: impl Into<String>) -> RowId {
        let mut id = RowId::generate();
        while self.contains(&id) {
            id = RowId::generate();
        }
        self.rows.push(Row::new(id.clone(), utterance));
        id
    }

    #[must_use]
    pub fn get(&self, id: &RowId) -> Option<&Row> {
        self.rows.iter().find(|row| &row.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &RowId) -> bool {
        self.get(id).is_some()
    }

    /// Runs `f` against the row and recomputes its overall status.
    pub fn mutate<R>(&mut self, id: &RowId, f: impl FnOnce(&mut Row) -> R) -> Option<R> {
        let row = self.rows.iter_mut().find(|row| &row.id == id)?;
        let result = f(row);
        row.refresh_status();
        Some(result)
    }

    /// Merges `patch` into the row. Returns `false` when the id is unknown.
    pub fn update(&mut self, id: &RowId, patch: RowPatch) -> bool {
        self.mutate(id, |row| patch.apply(row)).is_some()
    }

    pub fn delete(&mut self, id: &RowId) -> Option<Row> {
        let index = self.rows.iter().position(|row| &row.id == id)?;
        Some(self.rows.remove(index))
    }

    /// Read-only projection filtered and ordered by `query`.
    #[must_use]
    pub fn list(&self, query: &ListQuery) -> Vec<&Row> {
        let needle = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase);

        let mut rows: Vec<&Row> = self
            .rows
            .iter()
            .filter(|row| {
                needle
                    .as_deref()
                    .is_none_or(|needle| row.utterance.to_lowercase().contains(needle))
            })
            .filter(|row| query.status.is_none_or(|status| row.status == status))
            .collect();

        match query.sort {
            SortKey::Alphabetical => rows.sort_by(|a, b| alphabetical(a, b)),
            SortKey::Completeness => rows.sort_by(|a, b| {
                b.completed_stages()
                    .cmp(&a.completed_stages())
                    .then_with(|| alphabetical(a, b))
            }),
            SortKey::EvaluationScore => rows.sort_by(|a, b| {
                by_score(a.evaluation_score(), b.evaluation_score()).then_with(|| alphabetical(a, b))
            }),
        }
        rows
    }

    /// Swaps in a whole new working set (file import, canonical dataset).
    ///
    /// # Errors
    /// Rejects the batch, leaving the current rows untouched, when any row
    /// has an empty identity or an identity repeats.
    pub fn replace_all(&mut self, mut rows: Vec<Row>) -> Result<(), ImportError> {
        validate_rows(&rows)?;
        for row in &mut rows {
            row.refresh_status();
        }
        self.rows = rows;
        Ok(())
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// # Errors
/// First empty or duplicate identity found.
pub fn validate_rows(rows: &[Row]) -> Result<(), ImportError> {
    let mut seen = HashSet::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        if row.id.as_str().trim().is_empty() {
            return Err(ImportError::MissingIdentity { index });
        }
        if !seen.insert(&row.id) {
            return Err(ImportError::DuplicateIdentity(row.id.clone()));
        }
    }
    Ok(())
}

fn alphabetical(a: &Row, b: &Row) -> Ordering {
    a.utterance
        .to_lowercase()
        .cmp(&b.utterance.to_lowercase())
}

fn by_score(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
