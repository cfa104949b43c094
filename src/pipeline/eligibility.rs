//! Gate for the optional vector-structuring stage.
//!
//! Pure and cheap; callers re-check on every row change instead of caching.

use thiserror::Error;

use crate::model::Row;

/// Minimum aggregate evaluation score (1–5 scale).
pub const MIN_STRUCTURING_SCORE: f64 = 4.0;

/// First failing check, in evaluation order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IneligibleReason {
    #[error("rendered image required")]
    MissingImage,
    #[error("parsed analysis required")]
    InvalidAnalysis,
    #[error("composition elements required")]
    EmptyComposition,
    #[error("evaluation required")]
    EvaluationRequired,
    #[error("evaluation score {score:.2} is below {required:.1}")]
    ScoreTooLow { score: f64, required: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    Blocked(IneligibleReason),
}

impl Eligibility {
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&IneligibleReason> {
        match self {
            Eligibility::Eligible => None,
            Eligibility::Blocked(reason) => Some(reason),
        }
    }
}

#[must_use]
pub fn check(row: &Row) -> Eligibility {
    check_with_threshold(row, MIN_STRUCTURING_SCORE)
}

#[must_use]
pub fn check_with_threshold(row: &Row, min_score: f64) -> Eligibility {
    match first_failure(row, min_score) {
        Some(reason) => Eligibility::Blocked(reason),
        None => Eligibility::Eligible,
    }
}

fn first_failure(row: &Row, min_score: f64) -> Option<IneligibleReason> {
    if row.image.is_none() {
        return Some(IneligibleReason::MissingImage);
    }
    if !row.analysis.as_ref().is_some_and(|analysis| analysis.is_parsed()) {
        return Some(IneligibleReason::InvalidAnalysis);
    }
    if row
        .composition
        .as_ref()
        .is_none_or(|composition| composition.elements.is_empty())
    {
        return Some(IneligibleReason::EmptyComposition);
    }
    let Some(score) = row.evaluation_score() else {
        return Some(IneligibleReason::EvaluationRequired);
    };
    if score < min_score {
        return Some(IneligibleReason::ScoreTooLow {
            score,
            required: min_score,
        });
    }
    None
}
