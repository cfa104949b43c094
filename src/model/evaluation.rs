use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StageError;

pub const LIKERT_MIN: u8 = 1;
pub const LIKERT_MAX: u8 = 5;
pub const LIKERT_NEUTRAL: u8 = 3;

/// Six independent 1–5 quality axes. All six are required when
/// deserializing; a fresh sheet starts every axis at the neutral midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub semantics: u8,
    pub syntactics: u8,
    pub pragmatics: u8,
    pub clarity: u8,
    pub universality: u8,
    pub aesthetics: u8,
}

impl Default for EvaluationScores {
    fn default() -> Self {
        Self::uniform(LIKERT_NEUTRAL)
    }
}

impl EvaluationScores {
    #[must_use]
    pub const fn uniform(score: u8) -> Self {
        Self {
            semantics: score,
            syntactics: score,
            pragmatics: score,
            clarity: score,
            universality: score,
            aesthetics: score,
        }
    }

    #[must_use]
    pub fn axes(&self) -> [(&'static str, u8); 6] {
        [
            ("semantics", self.semantics),
            ("syntactics", self.syntactics),
            ("pragmatics", self.pragmatics),
            ("clarity", self.clarity),
            ("universality", self.universality),
            ("aesthetics", self.aesthetics),
        ]
    }

    /// Arithmetic mean of the six axes.
    #[must_use]
    pub fn average(&self) -> f64 {
        let axes = self.axes();
        let total: u32 = axes.iter().map(|(_, score)| u32::from(*score)).sum();
        f64::from(total) / axes.len() as f64
    }

    /// # Errors
    /// Returns [`StageError::Validation`] naming the first axis outside 1–5.
    pub fn validate(&self) -> Result<(), StageError> {
        for (axis, score) in self.axes() {
            if !(LIKERT_MIN..=LIKERT_MAX).contains(&score) {
                return Err(StageError::validation(format!(
                    "{axis} score {score} is outside {LIKERT_MIN}..={LIKERT_MAX}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub scores: EvaluationScores,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    pub fn new(scores: EvaluationScores, rationale: impl Into<String>) -> Self {
        Self {
            scores,
            rationale: rationale.into(),
            evaluated_at: None,
        }
    }

    #[must_use]
    pub fn average(&self) -> f64 {
        self.scores.average()
    }
}
