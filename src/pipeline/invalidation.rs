//! Downstream invalidation after an upstream change.
//!
//! The same rules apply whether the change came from a successful stage run
//! or from a manual edit.

use crate::model::{Row, StageStatus};

use super::stage::Stage;

/// What changed on a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePoint {
    /// The source text; sits before analysis.
    Utterance,
    /// The payload of this stage.
    Stage(Stage),
}

impl ChangePoint {
    /// Index into [`Stage::GENERATION`] of the first stage made stale.
    fn first_stale(self) -> usize {
        match self {
            ChangePoint::Utterance => 0,
            ChangePoint::Stage(stage) => stage.index() + 1,
        }
    }

    /// Everything up to and including rendering feeds the image, and with
    /// it the evaluation and the traced vectors.
    #[must_use]
    pub fn reaches_rendering(self) -> bool {
        !matches!(self, ChangePoint::Stage(Stage::Evaluation))
    }
}

/// Summary of what an invalidation touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub outdated: Vec<Stage>,
    pub evaluation_cleared: bool,
    /// The raw trace of the previous image was dropped.
    pub trace_cleared: bool,
}

impl Invalidation {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.outdated.is_empty() && !self.evaluation_cleared && !self.trace_cleared
    }
}

/// Marks every stage downstream of `point` as outdated, in place.
///
/// Payloads are kept. Only stages that hold a committed result
/// (`completed` or already `outdated`) flip: never-run stages stay `idle`,
/// a failed stage keeps its `error` marker, and a stage that is mid-flight is
/// left for its own commit. The evaluation is dropped back to `idle` with its
/// payload cleared, since the image it scored is no longer current; the raw
/// trace of that image is dropped too. The structured vector lives outside
/// the row and is discarded by the caller (see
/// [`crate::store::Workspace::discard_artifact`]).
pub fn invalidate(row: &mut Row, point: ChangePoint) -> Invalidation {
    let mut report = Invalidation::default();

    for stage in Stage::GENERATION.iter().skip(point.first_stale()) {
        match row.statuses.get(*stage) {
            StageStatus::Completed => {
                row.statuses.set(*stage, StageStatus::Outdated);
                report.outdated.push(*stage);
            }
            StageStatus::Outdated => report.outdated.push(*stage),
            StageStatus::Idle | StageStatus::Processing | StageStatus::Error => {}
        }
    }

    if point.reaches_rendering() {
        let had_payload = row.evaluation.take().is_some();
        let had_status = row.statuses.evaluation != StageStatus::Idle;
        row.statuses.evaluation = StageStatus::Idle;
        report.evaluation_cleared = had_payload || had_status;
        report.trace_cleared = row.raw_svg.take().is_some();
    }

    row.refresh_status();
    report
}

/// Pure form of [`invalidate`].
#[must_use]
pub fn invalidated(mut row: Row, point: ChangePoint) -> Row {
    invalidate(&mut row, point);
    row
}
