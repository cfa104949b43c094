use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stages in dependency order. `Evaluation` is the manual scoring
/// step and has no generation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Analysis,
    Composition,
    Rendering,
    Evaluation,
}

impl Stage {
    pub const GENERATION: [Stage; 3] = [Stage::Analysis, Stage::Composition, Stage::Rendering];
    pub const ALL: [Stage; 4] = [
        Stage::Analysis,
        Stage::Composition,
        Stage::Rendering,
        Stage::Evaluation,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Stage::Analysis => 0,
            Stage::Composition => 1,
            Stage::Rendering => 2,
            Stage::Evaluation => 3,
        }
    }

    #[must_use]
    pub fn is_generation(self) -> bool {
        !matches!(self, Stage::Evaluation)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Composition => "composition",
            Stage::Rendering => "rendering",
            Stage::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
