use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::RowId;

/// Per-row "stop requested" flags.
///
/// Cancellation is cooperative: collaborator calls already in flight always
/// finish; the flag is consulted right after each one returns and only the
/// commit of its result is skipped. A missing entry means "not cancelled".
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    flags: Mutex<HashMap<RowId, bool>>,
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<RowId, bool>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn request_stop(&self, id: &RowId) {
        self.flags().insert(id.clone(), true);
    }

    /// Clears the flag at the start of a unit of work.
    pub fn reset(&self, id: &RowId) {
        self.flags().insert(id.clone(), false);
    }

    #[must_use]
    pub fn is_stop_requested(&self, id: &RowId) -> bool {
        self.flags().get(id).copied().unwrap_or(false)
    }

    /// Drops the entry for a deleted row.
    pub fn forget(&self, id: &RowId) {
        self.flags().remove(id);
    }
}
