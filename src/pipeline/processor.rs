//! Runs one stage for one row.
//!
//! The processor is the only writer of stage payloads. Every failure is
//! caught here and turned into a stage status plus an activity log entry;
//! callers only see a [`StageOutcome`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::cancellation::CancellationRegistry;
use super::invalidation::{ChangePoint, invalidate};
use super::stage::Stage;
use crate::clients::{AnalysisRequest, CompositionRequest, GenerationClient, RenderingRequest};
use crate::error::StageError;
use crate::model::{
    AnalysisPayload, Composition, Evaluation, GlobalConfig, RenderedImage, Row, RowId, StageStatus,
};
use crate::observability::{ActivityLog, Metrics};
use crate::store::Workspace;

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed { duration: Duration },
    /// A stop was requested while the collaborator call was in flight; its
    /// result was discarded.
    Cancelled,
    Failed(StageError),
    /// The row was deleted before or during the run.
    RowMissing,
}

impl StageOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Completed { .. } => "completed",
            StageOutcome::Cancelled => "cancelled",
            StageOutcome::Failed(_) => "error",
            StageOutcome::RowMissing => "missing",
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }
}

/// Status a cancelled stage goes back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertTo {
    /// A committed `completed` or `error` survives; anything else becomes
    /// `idle`.
    Prior,
    /// Cascades never committed anything for the stage.
    Idle,
}

impl RevertTo {
    fn status(self, prior: StageStatus) -> StageStatus {
        match (self, prior) {
            (RevertTo::Prior, StageStatus::Completed | StageStatus::Error) => prior,
            _ => StageStatus::Idle,
        }
    }
}

enum StageRequest {
    Analysis(AnalysisRequest),
    /// Carries the normalized analysis when the row still held raw text.
    Composition(CompositionRequest, Option<AnalysisPayload>),
    Rendering(RenderingRequest),
}

enum StagePayload {
    Analysis(AnalysisPayload),
    Composition(Composition),
    Rendering(RenderedImage),
}

impl StagePayload {
    fn store(self, row: &mut Row) {
        match self {
            StagePayload::Analysis(analysis) => row.analysis = Some(analysis),
            StagePayload::Composition(composition) => row.composition = Some(composition),
            StagePayload::Rendering(image) => row.image = Some(image),
        }
    }
}

pub struct StageProcessor {
    workspace: Arc<Workspace>,
    generation: Arc<dyn GenerationClient>,
    cancellations: Arc<CancellationRegistry>,
    metrics: Arc<Metrics>,
    activity: Arc<ActivityLog>,
}

impl StageProcessor {
    pub fn new(
        workspace: Arc<Workspace>,
        generation: Arc<dyn GenerationClient>,
        cancellations: Arc<CancellationRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let activity = Arc::clone(workspace.activity());
        Self {
            workspace,
            generation,
            cancellations,
            metrics,
            activity,
        }
    }

    /// Runs one generation stage as a standalone unit of work.
    ///
    /// Clears the row's stop flag first. On cancellation the stage goes
    /// back to the status it had before this call.
    pub async fn process(&self, id: &RowId, stage: Stage) -> StageOutcome {
        if !stage.is_generation() {
            return StageOutcome::Failed(StageError::validation(
                "evaluation is committed with scores, not generated",
            ));
        }
        self.cancellations.reset(id);
        self.execute(id, stage, RevertTo::Prior).await
    }

    pub(crate) async fn execute(&self, id: &RowId, stage: Stage, revert: RevertTo) -> StageOutcome {
        let Some(row) = self.workspace.row(id) else {
            return StageOutcome::RowMissing;
        };
        let prior = row.stage_status(stage);

        let request = match build_request(&row, stage, self.workspace.config()) {
            Ok(request) => request,
            Err(error) => return self.fail(id, stage, error).await,
        };

        let normalized = match &request {
            StageRequest::Composition(_, normalized) => normalized.clone(),
            _ => None,
        };
        let started_row = self
            .workspace
            .mutate(id, |row| {
                if let Some(analysis) = normalized {
                    row.analysis = Some(analysis);
                }
                row.set_stage_status(stage, StageStatus::Processing);
            })
            .await;
        if started_row.is_none() {
            return StageOutcome::RowMissing;
        }
        info!(row_id = %id, stage = %stage, "stage started");
        self.activity.info(format!("{stage} started for {id}"));

        let started = Instant::now();
        let result = self.call(request).await;
        let elapsed = started.elapsed();

        if self.cancellations.is_stop_requested(id) {
            let status = revert.status(prior);
            self.workspace
                .mutate(id, |row| row.set_stage_status(stage, status))
                .await;
            info!(row_id = %id, stage = %stage, reverted_to = %status, "stage cancelled");
            self.activity.warn(format!("{stage} stopped for {id}"));
            self.metrics.record_stage(stage.as_str(), "cancelled");
            return StageOutcome::Cancelled;
        }

        match result {
            Ok(payload) => self.commit(id, stage, payload, elapsed).await,
            Err(error) => {
                self.fail(id, stage, StageError::collaborator(stage, &error))
                    .await
            }
        }
    }

    async fn call(&self, request: StageRequest) -> anyhow::Result<StagePayload> {
        match request {
            StageRequest::Analysis(request) => self
                .generation
                .analyze(&request)
                .await
                .map(StagePayload::Analysis),
            StageRequest::Composition(request, _) => self
                .generation
                .compose(&request)
                .await
                .map(StagePayload::Composition),
            StageRequest::Rendering(request) => self
                .generation
                .render(&request)
                .await
                .map(StagePayload::Rendering),
        }
    }

    async fn commit(
        &self,
        id: &RowId,
        stage: Stage,
        payload: StagePayload,
        elapsed: Duration,
    ) -> StageOutcome {
        let seconds = elapsed.as_secs_f64();
        let invalidation = self
            .workspace
            .mutate(id, |row| {
                payload.store(row);
                row.durations.set(stage, seconds);
                row.statuses.set(stage, StageStatus::Completed);
                invalidate(row, ChangePoint::Stage(stage))
            })
            .await;
        let Some(invalidation) = invalidation else {
            return StageOutcome::RowMissing;
        };
        // 新しい画像に対して古いベクターは無効
        let artifact_discarded = ChangePoint::Stage(stage).reaches_rendering()
            && self.workspace.discard_artifact(id).await;

        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(
            row_id = %id,
            stage = %stage,
            duration_ms,
            outdated = ?invalidation.outdated,
            evaluation_cleared = invalidation.evaluation_cleared,
            trace_cleared = invalidation.trace_cleared,
            artifact_discarded,
            "stage completed"
        );
        self.activity
            .info(format!("{stage} completed for {id} in {seconds:.1}s"));
        self.metrics.record_stage(stage.as_str(), "completed");
        self.metrics.observe_stage_duration(stage.as_str(), seconds);
        StageOutcome::Completed { duration: elapsed }
    }

    async fn fail(&self, id: &RowId, stage: Stage, error: StageError) -> StageOutcome {
        let marked = self
            .workspace
            .mutate(id, |row| row.set_stage_status(stage, StageStatus::Error))
            .await;
        if marked.is_none() {
            return StageOutcome::RowMissing;
        }
        warn!(row_id = %id, stage = %stage, error = %error, "stage failed");
        self.activity.error(format!("{stage} failed for {id}: {error}"));
        self.metrics.record_stage(stage.as_str(), "error");
        StageOutcome::Failed(error)
    }

    /// Commits user-supplied scores. Evaluation has no collaborator call.
    pub async fn commit_evaluation(&self, id: &RowId, mut evaluation: Evaluation) -> StageOutcome {
        let Some(row) = self.workspace.row(id) else {
            return StageOutcome::RowMissing;
        };
        if let Err(error) = evaluation.scores.validate() {
            return self.fail(id, Stage::Evaluation, error).await;
        }
        if row.image.is_none() {
            let error = StageError::validation("evaluation requires a rendered image");
            return self.fail(id, Stage::Evaluation, error).await;
        }

        if evaluation.evaluated_at.is_none() {
            evaluation.evaluated_at = Some(Utc::now());
        }
        let average = evaluation.average();
        let committed = self
            .workspace
            .mutate(id, |row| {
                row.evaluation = Some(evaluation);
                row.set_stage_status(Stage::Evaluation, StageStatus::Completed);
            })
            .await;
        if committed.is_none() {
            return StageOutcome::RowMissing;
        }
        debug!(row_id = %id, average, "evaluation committed");
        self.activity
            .info(format!("evaluation saved for {id} (average {average:.2})"));
        self.metrics.record_stage(Stage::Evaluation.as_str(), "completed");
        StageOutcome::Completed {
            duration: Duration::ZERO,
        }
    }
}

fn build_request(row: &Row, stage: Stage, config: GlobalConfig) -> Result<StageRequest, StageError> {
    let utterance = row.utterance.trim();
    if utterance.is_empty() {
        return Err(StageError::validation("utterance is empty"));
    }
    let utterance = utterance.to_string();

    match stage {
        Stage::Analysis => Ok(StageRequest::Analysis(AnalysisRequest { utterance, config })),
        Stage::Composition => {
            let payload = row
                .analysis
                .as_ref()
                .ok_or_else(|| StageError::validation("composition requires an analysis"))?;
            let record = payload.to_record()?;
            let normalized =
                (!payload.is_parsed()).then(|| AnalysisPayload::Parsed(record.clone()));
            Ok(StageRequest::Composition(
                CompositionRequest {
                    utterance,
                    analysis: record,
                    config,
                },
                normalized,
            ))
        }
        Stage::Rendering => {
            let composition = row
                .composition
                .as_ref()
                .filter(|composition| composition.is_renderable())
                .ok_or_else(|| StageError::validation("rendering requires a composition"))?;
            Ok(StageRequest::Rendering(RenderingRequest {
                utterance,
                composition: composition.clone(),
                config,
            }))
        }
        Stage::Evaluation => Err(StageError::validation(
            "evaluation is committed with scores, not generated",
        )),
    }
}
