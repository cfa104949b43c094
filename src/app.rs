//! `Studio`: the single entry point wiring storage, collaborators and the
//! pipeline together.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::clients::{GenerationClient, Structurer, StructuringPhase, StructuringRequest, Vectorizer};
use crate::config::Config;
use crate::error::{ImportError, StageError};
use crate::model::{
    AnalysisPayload, AnalysisRecord, Composition, Evaluation, GlobalConfig, NodeId, Row, RowId,
};
use crate::observability::{ActivityLog, Metrics, activity::DEFAULT_CAPACITY};
use crate::pipeline::eligibility::{self, MIN_STRUCTURING_SCORE};
use crate::pipeline::invalidation::{ChangePoint, Invalidation, invalidate};
use crate::pipeline::processor::StageOutcome;
use crate::pipeline::{
    CancellationRegistry, CascadeReport, CascadeRunner, CascadeState, Eligibility, Stage,
    StageProcessor,
};
use crate::store::transfer::{self, ImportSource};
use crate::store::{
    FileStore, KeyValueStore, ListQuery, MemoryStore, RowStore, StructuredVector, Workspace,
};
use crate::util::json::extract_svg;

/// A manual change to one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEdit {
    Utterance(String),
    /// Analysis typed as text; kept raw when it does not parse.
    AnalysisText(String),
    Analysis(AnalysisRecord),
    Composition(Composition),
    SpatialPrompt(String),
    AddElement {
        parent: Option<NodeId>,
        label: String,
    },
    RenameElement {
        node: NodeId,
        label: String,
    },
    RemoveElement {
        node: NodeId,
    },
    /// Only the evaluation's free text; invalidates nothing.
    Rationale(String),
}

impl RowEdit {
    /// Where the edit enters the dependency chain; `None` for edits nothing
    /// depends on.
    #[must_use]
    pub fn change_point(&self) -> Option<ChangePoint> {
        match self {
            RowEdit::Utterance(_) => Some(ChangePoint::Utterance),
            RowEdit::AnalysisText(_) | RowEdit::Analysis(_) => {
                Some(ChangePoint::Stage(Stage::Analysis))
            }
            RowEdit::Composition(_)
            | RowEdit::SpatialPrompt(_)
            | RowEdit::AddElement { .. }
            | RowEdit::RenameElement { .. }
            | RowEdit::RemoveElement { .. } => Some(ChangePoint::Stage(Stage::Composition)),
            RowEdit::Rationale(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditResult {
    Applied(Invalidation),
    /// A new element was inserted into the composition tree.
    Added {
        node: NodeId,
        invalidation: Invalidation,
    },
}

impl EditResult {
    #[must_use]
    pub fn invalidation(&self) -> &Invalidation {
        match self {
            EditResult::Applied(invalidation) | EditResult::Added { invalidation, .. } => {
                invalidation
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows: usize,
    /// Whether the import replaced the whole working set instead of
    /// appending to it.
    pub replaced: bool,
}

pub struct StudioBuilder {
    generation: Arc<dyn GenerationClient>,
    storage: Option<Arc<dyn KeyValueStore>>,
    vectorizer: Option<Arc<dyn Vectorizer>>,
    structurer: Option<Arc<dyn Structurer>>,
    activity_capacity: usize,
    min_structuring_score: f64,
}

impl StudioBuilder {
    pub fn new(generation: Arc<dyn GenerationClient>) -> Self {
        Self {
            generation,
            storage: None,
            vectorizer: None,
            structurer: None,
            activity_capacity: DEFAULT_CAPACITY,
            min_structuring_score: MIN_STRUCTURING_SCORE,
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_vectorizer(mut self, vectorizer: Arc<dyn Vectorizer>) -> Self {
        self.vectorizer = Some(vectorizer);
        self
    }

    #[must_use]
    pub fn with_structurer(mut self, structurer: Arc<dyn Structurer>) -> Self {
        self.structurer = Some(structurer);
        self
    }

    #[must_use]
    pub fn with_activity_capacity(mut self, capacity: usize) -> Self {
        self.activity_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_min_structuring_score(mut self, score: f64) -> Self {
        self.min_structuring_score = score;
        self
    }

    /// File-backed storage, activity cap and structuring threshold from the
    /// process configuration.
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.with_storage(Arc::new(FileStore::new(config.storage_dir())))
            .with_activity_capacity(config.activity_log_capacity())
            .with_min_structuring_score(config.structuring_min_score())
    }

    /// 永続化済みの状態を読み込み、各コンポーネントを結線する。
    ///
    /// # Errors
    /// Metrics の登録に失敗した場合はエラーを返す。
    pub async fn build(self) -> Result<Studio> {
        let metrics = Arc::new(Metrics::new().context("failed to register studio metrics")?);
        let activity = Arc::new(ActivityLog::new(self.activity_capacity));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);

        let workspace =
            Arc::new(Workspace::load(storage, Arc::clone(&activity), Arc::clone(&metrics)).await);
        let cancellations = Arc::new(CancellationRegistry::new());
        let processor = Arc::new(StageProcessor::new(
            Arc::clone(&workspace),
            self.generation,
            Arc::clone(&cancellations),
            Arc::clone(&metrics),
        ));
        let cascades = Arc::new(CascadeRunner::new(
            Arc::clone(&processor),
            Arc::clone(&workspace),
            Arc::clone(&cancellations),
            Arc::clone(&metrics),
        ));

        debug!(
            rows = workspace.read(RowStore::len),
            "studio ready"
        );
        Ok(Studio {
            workspace,
            processor,
            cascades,
            cancellations,
            vectorizer: self.vectorizer,
            structurer: self.structurer,
            activity,
            metrics,
            min_structuring_score: self.min_structuring_score,
        })
    }
}

pub struct Studio {
    workspace: Arc<Workspace>,
    processor: Arc<StageProcessor>,
    cascades: Arc<CascadeRunner>,
    cancellations: Arc<CancellationRegistry>,
    vectorizer: Option<Arc<dyn Vectorizer>>,
    structurer: Option<Arc<dyn Structurer>>,
    activity: Arc<ActivityLog>,
    metrics: Arc<Metrics>,
    min_structuring_score: f64,
}

impl Studio {
    pub fn builder(generation: Arc<dyn GenerationClient>) -> StudioBuilder {
        StudioBuilder::new(generation)
    }

    pub async fn create_row(&self, utterance: impl Into<String>) -> RowId {
        let utterance = utterance.into();
        let id = self.workspace.write(|rows| rows.create(utterance)).await;
        self.activity.info(format!("row {id} created"));
        id
    }

    #[must_use]
    pub fn row(&self, id: &RowId) -> Option<Row> {
        self.workspace.row(id)
    }

    #[must_use]
    pub fn rows(&self, query: &ListQuery) -> Vec<Row> {
        self.workspace.rows(query)
    }

    /// Applies a manual edit and the invalidation it implies, as one
    /// mutation.
    ///
    /// # Errors
    /// [`StageError::RowNotFound`] for an unknown row, or
    /// [`StageError::Validation`] when the edit does not fit the row (for
    /// example renaming an element that no longer exists). A rejected edit
    /// changes nothing.
    pub async fn edit_row(&self, id: &RowId, edit: RowEdit) -> Result<EditResult, StageError> {
        let reaches_rendering = edit
            .change_point()
            .is_some_and(ChangePoint::reaches_rendering);
        let result = self
            .workspace
            .mutate(id, |row| apply_edit(row, edit))
            .await
            .ok_or_else(|| StageError::RowNotFound(id.clone()))??;
        if reaches_rendering {
            self.workspace.discard_artifact(id).await;
        }
        debug!(row_id = %id, outdated = ?result.invalidation().outdated, "row edited");
        Ok(result)
    }

    /// Removes the row, its structured vector and any pending stop flag.
    pub async fn delete_row(&self, id: &RowId) -> bool {
        let removed = self.workspace.remove_row(id).await.is_some();
        if removed {
            self.cancellations.forget(id);
            self.cascades.forget(id);
            self.activity.info(format!("row {id} deleted"));
        }
        removed
    }

    pub async fn run_stage(&self, id: &RowId, stage: Stage) -> StageOutcome {
        self.processor.process(id, stage).await
    }

    pub async fn run_cascade(&self, id: &RowId) -> CascadeReport {
        self.cascades.run(id).await
    }

    pub async fn run_cascades(&self, ids: &[RowId]) -> Vec<CascadeReport> {
        self.cascades.run_many(ids).await
    }

    #[must_use]
    pub fn cascade_state(&self, id: &RowId) -> CascadeState {
        self.cascades.state(id)
    }

    /// Cooperative: whatever is in flight finishes, only its commit is
    /// skipped.
    pub fn request_stop(&self, id: &RowId) {
        self.cancellations.request_stop(id);
        self.activity.info(format!("stop requested for {id}"));
    }

    pub async fn evaluate(&self, id: &RowId, evaluation: Evaluation) -> StageOutcome {
        self.processor.commit_evaluation(id, evaluation).await
    }

    #[must_use]
    pub fn eligibility(&self, id: &RowId) -> Option<Eligibility> {
        self.workspace
            .row(id)
            .map(|row| eligibility::check_with_threshold(&row, self.min_structuring_score))
    }

    /// Traces the rendered image into raw SVG and stores it on the row.
    ///
    /// Returns `Ok(None)` when a stop was requested while tracing.
    ///
    /// # Errors
    /// Missing row, image or vectorizer, or a vectorizer failure.
    pub async fn trace_vector(&self, id: &RowId) -> Result<Option<String>, StageError> {
        let vectorizer = self
            .vectorizer
            .as_ref()
            .ok_or_else(|| StageError::validation("no vectorizer configured"))?;
        let row = self
            .workspace
            .row(id)
            .ok_or_else(|| StageError::RowNotFound(id.clone()))?;
        let image = row
            .image
            .ok_or_else(|| StageError::validation("tracing requires a rendered image"))?;

        self.cancellations.reset(id);
        let progress = |percent: u8| debug!(row_id = %id, percent, "tracing");
        let traced = vectorizer.trace(&image, &progress).await;

        if self.cancellations.is_stop_requested(id) {
            self.activity.warn(format!("tracing stopped for {id}"));
            return Ok(None);
        }
        let svg = match traced {
            Ok(svg) => svg,
            Err(error) => {
                let error = StageError::Vector(format!("{error:#}"));
                self.activity.error(format!("tracing failed for {id}: {error}"));
                return Err(error);
            }
        };

        self.workspace
            .mutate(id, |row| row.raw_svg = Some(svg.clone()))
            .await
            .ok_or_else(|| StageError::RowNotFound(id.clone()))?;
        self.activity.info(format!("vector traced for {id}"));
        Ok(Some(svg))
    }

    /// Structures the traced vector of an eligible row and stores the
    /// result in the artifact library.
    ///
    /// Returns `Ok(None)` when a stop was requested while structuring.
    ///
    /// # Errors
    /// [`StageError::Ineligible`] with the first failing check, a missing
    /// raw vector, or a structuring failure.
    pub async fn structure_vector(
        &self,
        id: &RowId,
    ) -> Result<Option<StructuredVector>, StageError> {
        let structurer = self
            .structurer
            .as_ref()
            .ok_or_else(|| StageError::validation("no structurer configured"))?;
        let row = self
            .workspace
            .row(id)
            .ok_or_else(|| StageError::RowNotFound(id.clone()))?;
        if let Eligibility::Blocked(reason) =
            eligibility::check_with_threshold(&row, self.min_structuring_score)
        {
            return Err(StageError::Ineligible(reason));
        }
        let request = structuring_request(row, self.workspace.config())?;

        self.cancellations.reset(id);
        let activity = Arc::clone(&self.activity);
        let on_phase = move |phase: StructuringPhase| activity.info(format!("structuring: {phase}"));
        let structured = structurer.structure(&request, &on_phase).await;

        if self.cancellations.is_stop_requested(id) {
            self.activity.warn(format!("structuring stopped for {id}"));
            return Ok(None);
        }
        let svg = structured
            .map_err(|error| StageError::Vector(format!("{error:#}")))
            .and_then(|markup| {
                extract_svg(&markup)
                    .map(ToString::to_string)
                    .ok_or_else(|| StageError::Vector("structured output is not SVG".to_string()))
            });
        let svg = match svg {
            Ok(svg) => svg,
            Err(error) => {
                self.activity
                    .error(format!("structuring failed for {id}: {error}"));
                return Err(error);
            }
        };

        let current = self
            .workspace
            .row(id)
            .ok_or_else(|| StageError::RowNotFound(id.clone()))?;
        if current.raw_svg.as_deref() != Some(request.raw_svg.as_str()) {
            return Err(StageError::validation(
                "the traced vector changed while structuring",
            ));
        }
        let stored = self.workspace.store_artifact(id, svg).await;
        info!(row_id = %id, "structured vector stored");
        Ok(Some(stored))
    }

    #[must_use]
    pub fn structured_svg(&self, id: &RowId) -> Option<StructuredVector> {
        self.workspace.artifact(id)
    }

    /// Phrase lists append rows; workspace documents replace the working
    /// set (and the studio config when the document carries one).
    ///
    /// # Errors
    /// The whole import is rejected on any malformed input.
    pub async fn import_text(&self, text: &str) -> Result<ImportSummary, ImportError> {
        let summary = match ImportSource::detect(text) {
            ImportSource::Phrases => {
                let phrases = transfer::parse_phrases(text);
                if phrases.is_empty() {
                    return Err(ImportError::Empty);
                }
                let count = phrases.len();
                self.workspace
                    .write(|rows| {
                        for phrase in phrases {
                            rows.create(phrase);
                        }
                    })
                    .await;
                ImportSummary {
                    rows: count,
                    replaced: false,
                }
            }
            ImportSource::Workspace => self.load_dataset(text).await?,
        };
        self.activity.info(format!(
            "imported {} row(s){}",
            summary.rows,
            if summary.replaced { ", replacing the workspace" } else { "" }
        ));
        Ok(summary)
    }

    /// # Errors
    /// Unreadable file, or any error of [`Studio::import_text`].
    pub async fn import_file(&self, path: &Path) -> Result<ImportSummary, ImportError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| ImportError::Unreadable {
                path: path.display().to_string(),
                message: error.to_string(),
            })?;
        self.import_text(&text).await
    }

    /// Replaces the working set with a workspace document.
    ///
    /// # Errors
    /// Malformed or invalid documents leave the current rows untouched.
    pub async fn load_dataset(&self, text: &str) -> Result<ImportSummary, ImportError> {
        let document = transfer::parse_document(text)?;
        let count = document.rows.len();
        self.workspace
            .replace_all(document.rows, document.config)
            .await?;
        Ok(ImportSummary {
            rows: count,
            replaced: true,
        })
    }

    /// # Errors
    /// Only if a payload fails to serialize.
    pub fn export_workspace(&self) -> serde_json::Result<String> {
        let config = self.workspace.config();
        self.workspace
            .read(|rows| transfer::export_document(rows.rows(), &config))
    }

    #[must_use]
    pub fn config(&self) -> GlobalConfig {
        self.workspace.config()
    }

    pub async fn update_config(&self, config: GlobalConfig) {
        self.workspace.update_config(config).await;
        self.activity.info("configuration updated");
    }

    #[must_use]
    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

fn structuring_request(row: Row, config: GlobalConfig) -> Result<StructuringRequest, StageError> {
    let raw_svg = row
        .raw_svg
        .ok_or_else(|| StageError::validation("trace the image before structuring"))?;
    let analysis = row
        .analysis
        .as_ref()
        .map(AnalysisPayload::to_record)
        .transpose()?
        .ok_or_else(|| StageError::validation("structuring requires an analysis"))?;
    match (row.image, row.composition, row.evaluation) {
        (Some(image), Some(composition), Some(evaluation)) => Ok(StructuringRequest {
            raw_svg,
            image,
            analysis,
            composition,
            evaluation,
            utterance: row.utterance,
            config,
        }),
        _ => Err(StageError::validation(
            "structuring requires image, composition and evaluation",
        )),
    }
}

/// Validates and applies `edit`, then invalidates downstream. Nothing is
/// changed when validation fails.
fn apply_edit(row: &mut Row, edit: RowEdit) -> Result<EditResult, StageError> {
    let point = edit.change_point();
    let mut added = None;

    match edit {
        RowEdit::Utterance(utterance) => row.utterance = utterance,
        RowEdit::AnalysisText(text) => {
            let payload = AnalysisRecord::from_text(&text)
                .map_or(AnalysisPayload::Raw(text), AnalysisPayload::Parsed);
            row.analysis = Some(payload);
        }
        RowEdit::Analysis(record) => row.analysis = Some(AnalysisPayload::Parsed(record)),
        RowEdit::Composition(composition) => row.composition = Some(composition),
        RowEdit::SpatialPrompt(prompt) => {
            row.composition.get_or_insert_with(Composition::default).spatial_prompt = prompt;
        }
        RowEdit::AddElement { parent, label } => {
            let mut composition = row.composition.clone().unwrap_or_default();
            added = Some(composition.elements.add(parent, label)?);
            row.composition = Some(composition);
        }
        RowEdit::RenameElement { node, label } => {
            let composition = composition_mut(row)?;
            composition.elements.rename(node, label)?;
        }
        RowEdit::RemoveElement { node } => {
            let composition = composition_mut(row)?;
            composition.elements.remove(node)?;
        }
        RowEdit::Rationale(rationale) => {
            let evaluation = row
                .evaluation
                .as_mut()
                .ok_or_else(|| StageError::validation("row has no evaluation"))?;
            evaluation.rationale = rationale;
        }
    }

    let invalidation = match point {
        Some(point) => invalidate(row, point),
        None => Invalidation::default(),
    };
    Ok(match added {
        Some(node) => EditResult::Added { node, invalidation },
        None => EditResult::Applied(invalidation),
    })
}

fn composition_mut(row: &mut Row) -> Result<&mut Composition, StageError> {
    row.composition
        .as_mut()
        .ok_or_else(|| StageError::validation("row has no composition"))
}
