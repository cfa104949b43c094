//! Analysis → composition → rendering for one row, stopping at the first
//! failure or stop request.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tracing::info;

use super::cancellation::CancellationRegistry;
use super::processor::{RevertTo, StageOutcome, StageProcessor};
use super::stage::Stage;
use crate::error::StageError;
use crate::model::{RowId, StageDurations, StageStatus};
use crate::observability::Metrics;
use crate::store::Workspace;

/// Transient, per-row cascade state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeState {
    #[default]
    Idle,
    Running(Stage),
    Completed,
    Failed(Stage),
    Stopped(Stage),
}

impl CascadeState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CascadeState::Idle => "idle",
            CascadeState::Running(_) => "running",
            CascadeState::Completed => "completed",
            CascadeState::Failed(_) => "failed",
            CascadeState::Stopped(_) => "stopped",
        }
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, CascadeState::Running(_))
    }
}

impl fmt::Display for CascadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeState::Running(stage)
            | CascadeState::Failed(stage)
            | CascadeState::Stopped(stage) => write!(f, "{}({stage})", self.label()),
            CascadeState::Idle | CascadeState::Completed => f.write_str(self.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeReport {
    pub row_id: RowId,
    pub state: CascadeState,
    /// Set for `Failed`, and when the row is unknown.
    pub error: Option<StageError>,
    pub durations: StageDurations,
}

pub struct CascadeRunner {
    processor: Arc<StageProcessor>,
    workspace: Arc<Workspace>,
    cancellations: Arc<CancellationRegistry>,
    metrics: Arc<Metrics>,
    states: Mutex<HashMap<RowId, CascadeState>>,
}

impl CascadeRunner {
    pub fn new(
        processor: Arc<StageProcessor>,
        workspace: Arc<Workspace>,
        cancellations: Arc<CancellationRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            processor,
            workspace,
            cancellations,
            metrics,
            states: Mutex::default(),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<RowId, CascadeState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last known state of the row's cascade; `Idle` if none ran.
    #[must_use]
    pub fn state(&self, id: &RowId) -> CascadeState {
        self.states().get(id).copied().unwrap_or_default()
    }

    fn set_state(&self, id: &RowId, state: CascadeState) {
        self.states().insert(id.clone(), state);
    }

    pub fn forget(&self, id: &RowId) {
        self.states().remove(id);
    }

    pub async fn run(&self, id: &RowId) -> CascadeReport {
        if !self.workspace.contains(id) {
            return CascadeReport {
                row_id: id.clone(),
                state: CascadeState::Idle,
                error: Some(StageError::RowNotFound(id.clone())),
                durations: StageDurations::default(),
            };
        }

        self.cancellations.reset(id);
        self.metrics.active_cascades.inc();
        info!(row_id = %id, "cascade started");

        let (state, error) = self.drive(id).await;

        self.set_state(id, state);
        self.metrics.active_cascades.dec();
        self.metrics.cascades.with_label_values(&[state.label()]).inc();
        info!(row_id = %id, state = %state, "cascade finished");

        let durations = self
            .workspace
            .row(id)
            .map(|row| row.durations)
            .unwrap_or_default();
        CascadeReport {
            row_id: id.clone(),
            state,
            error,
            durations,
        }
    }

    async fn drive(&self, id: &RowId) -> (CascadeState, Option<StageError>) {
        let mut upstream: Option<Stage> = None;

        for stage in Stage::GENERATION {
            if self.cancellations.is_stop_requested(id) {
                return (CascadeState::Stopped(stage), None);
            }
            // 前段が completed でなければ次に進まない（行は毎回読み直す）
            if let Some(previous) = upstream {
                let ready = self
                    .workspace
                    .row(id)
                    .is_some_and(|row| row.stage_status(previous) == StageStatus::Completed);
                if !ready {
                    let error = StageError::validation(format!(
                        "{previous} is no longer completed; {stage} was not started"
                    ));
                    return (CascadeState::Failed(stage), Some(error));
                }
            }

            self.set_state(id, CascadeState::Running(stage));
            match self.processor.execute(id, stage, RevertTo::Idle).await {
                StageOutcome::Completed { .. } => upstream = Some(stage),
                StageOutcome::Cancelled => return (CascadeState::Stopped(stage), None),
                StageOutcome::Failed(error) => return (CascadeState::Failed(stage), Some(error)),
                StageOutcome::RowMissing => {
                    return (
                        CascadeState::Failed(stage),
                        Some(StageError::RowNotFound(id.clone())),
                    );
                }
            }
        }
        (CascadeState::Completed, None)
    }

    /// Runs independent cascades concurrently. Reports come back in input
    /// order.
    pub async fn run_many(&self, ids: &[RowId]) -> Vec<CascadeReport> {
        join_all(ids.iter().map(|id| self.run(id))).await
    }
}
