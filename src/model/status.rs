use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::stage::Stage;

/// Lifecycle of a single stage on a single row.
///
/// `Idle` means never run (or a run was abandoned), `Outdated` means a payload
/// exists but an upstream change made it stale, `Completed` means the payload
/// is current. These are never inferred from payload presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
    Outdated,
}

impl StageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Idle => "idle",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Error => "error",
            StageStatus::Outdated => "outdated",
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, StageStatus::Completed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage statuses of a row. Missing fields deserialize as `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageStatuses {
    pub analysis: StageStatus,
    pub composition: StageStatus,
    pub rendering: StageStatus,
    pub evaluation: StageStatus,
}

impl StageStatuses {
    #[must_use]
    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Analysis => self.analysis,
            Stage::Composition => self.composition,
            Stage::Rendering => self.rendering,
            Stage::Evaluation => self.evaluation,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Analysis => self.analysis = status,
            Stage::Composition => self.composition = status,
            Stage::Rendering => self.rendering = status,
            Stage::Evaluation => self.evaluation = status,
        }
    }

    /// Aggregate of the three generation stages, used for list filtering.
    #[must_use]
    pub fn overall(&self) -> StageStatus {
        let generation = Stage::GENERATION.map(|stage| self.get(stage));
        if generation.contains(&StageStatus::Error) {
            StageStatus::Error
        } else if generation.contains(&StageStatus::Processing) {
            StageStatus::Processing
        } else if generation.iter().all(|status| status.is_completed()) {
            StageStatus::Completed
        } else if generation.contains(&StageStatus::Outdated) {
            StageStatus::Outdated
        } else {
            StageStatus::Idle
        }
    }

    /// Stages left `processing` by an interrupted session never committed
    /// anything, so they go back to `idle`.
    pub fn settle_interrupted(&mut self) -> bool {
        let mut changed = false;
        for stage in Stage::ALL {
            if self.get(stage) == StageStatus::Processing {
                self.set(stage, StageStatus::Idle);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use StageStatus::{Completed, Error, Idle, Outdated, Processing};

    #[rstest]
    #[case([Idle, Idle, Idle], Idle)]
    #[case([Completed, Idle, Idle], Idle)]
    #[case([Completed, Completed, Completed], Completed)]
    #[case([Completed, Outdated, Outdated], Outdated)]
    #[case([Completed, Processing, Idle], Processing)]
    #[case([Completed, Completed, Error], Error)]
    #[case([Error, Processing, Outdated], Error)]
    fn overall_status_aggregates_generation_stages(
        #[case] generation: [StageStatus; 3],
        #[case] expected: StageStatus,
    ) {
        let statuses = StageStatuses {
            analysis: generation[0],
            composition: generation[1],
            rendering: generation[2],
            evaluation: Completed,
        };
        assert_eq!(statuses.overall(), expected);
    }

    #[test]
    fn missing_status_fields_default_to_idle() {
        let statuses: StageStatuses =
            serde_json::from_str(r#"{"analysis":"completed"}"#).expect("statuses parse");
        assert_eq!(statuses.analysis, Completed);
        assert_eq!(statuses.composition, Idle);
        assert_eq!(statuses.evaluation, Idle);
    }

    #[test]
    fn settle_interrupted_reverts_processing_only() {
        let mut statuses = StageStatuses {
            analysis: Completed,
            composition: Processing,
            rendering: Outdated,
            evaluation: Idle,
        };
        assert!(statuses.settle_interrupted());
        assert_eq!(statuses.composition, Idle);
        assert_eq!(statuses.rendering, Outdated);
        assert!(!statuses.settle_interrupted());
    }
}
