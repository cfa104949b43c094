use std::fmt;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use super::{AnalysisPayload, Composition, Evaluation, RenderedImage, StageStatus, StageStatuses};
use crate::pipeline::stage::Stage;

/// Stable identity of a row. Generated ids are `row-<millis hex>-<suffix>`,
/// unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        Self(format!("row-{millis:x}-{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Wall-clock seconds of the last successful run of each generation stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageDurations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composition: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendering: Option<f64>,
}

impl StageDurations {
    #[must_use]
    pub fn get(&self, stage: Stage) -> Option<f64> {
        match stage {
            Stage::Analysis => self.analysis,
            Stage::Composition => self.composition,
            Stage::Rendering => self.rendering,
            Stage::Evaluation => None,
        }
    }

    pub fn set(&mut self, stage: Stage, seconds: f64) {
        match stage {
            Stage::Analysis => self.analysis = Some(seconds),
            Stage::Composition => self.composition = Some(seconds),
            Stage::Rendering => self.rendering = Some(seconds),
            Stage::Evaluation => {}
        }
    }
}

/// The unit of pipeline work: one source utterance and everything derived
/// from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub utterance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<Composition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<RenderedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    /// Raw traced vector markup. The structured form lives in the artifact
    /// library, keyed by the same id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_svg: Option<String>,
    #[serde(default)]
    pub statuses: StageStatuses,
    #[serde(default)]
    pub durations: StageDurations,
    #[serde(default)]
    pub status: StageStatus,
}

impl Row {
    pub fn new(id: RowId, utterance: impl Into<String>) -> Self {
        Self {
            id,
            utterance: utterance.into(),
            analysis: None,
            composition: None,
            image: None,
            evaluation: None,
            raw_svg: None,
            statuses: StageStatuses::default(),
            durations: StageDurations::default(),
            status: StageStatus::Idle,
        }
    }

    #[must_use]
    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.statuses.get(stage)
    }

    pub fn set_stage_status(&mut self, stage: Stage, status: StageStatus) {
        self.statuses.set(stage, status);
        self.refresh_status();
    }

    pub fn refresh_status(&mut self) {
        self.status = self.statuses.overall();
    }

    /// Completed stages among analysis, composition, rendering and evaluation.
    #[must_use]
    pub fn completed_stages(&self) -> usize {
        Stage::ALL
            .iter()
            .filter(|stage| self.stage_status(**stage).is_completed())
            .count()
    }

    #[must_use]
    pub fn evaluation_score(&self) -> Option<f64> {
        self.evaluation.as_ref().map(Evaluation::average)
    }
}

/// Partial update merged into a row by [`crate::store::RowStore::update`].
///
/// Outer `None` leaves a field alone; `Some(None)` clears an optional payload.
#[derive(Debug, Clone, Default)]
pub struct RowPatch {
    pub utterance: Option<String>,
    pub analysis: Option<Option<AnalysisPayload>>,
    pub composition: Option<Option<Composition>>,
    pub image: Option<Option<RenderedImage>>,
    pub evaluation: Option<Option<Evaluation>>,
    pub raw_svg: Option<Option<String>>,
    pub statuses: Option<StageStatuses>,
    pub durations: Option<StageDurations>,
}

impl RowPatch {
    pub fn apply(self, row: &mut Row) {
        if let Some(utterance) = self.utterance {
            row.utterance = utterance;
        }
        if let Some(analysis) = self.analysis {
            row.analysis = analysis;
        }
        if let Some(composition) = self.composition {
            row.composition = composition;
        }
        if let Some(image) = self.image {
            row.image = image;
        }
        if let Some(evaluation) = self.evaluation {
            row.evaluation = evaluation;
        }
        if let Some(raw_svg) = self.raw_svg {
            row.raw_svg = raw_svg;
        }
        if let Some(statuses) = self.statuses {
            row.statuses = statuses;
        }
        if let Some(durations) = self.durations {
            row.durations = durations;
        }
        row.refresh_status();
    }
}
