use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::model::{AnalysisRecord, Composition, Evaluation, GlobalConfig, RenderedImage};

/// Coarse progress of a structuring call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuringPhase {
    Sending,
    Receiving,
    Sanitizing,
}

impl fmt::Display for StructuringPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StructuringPhase::Sending => "sending",
            StructuringPhase::Receiving => "receiving",
            StructuringPhase::Sanitizing => "sanitizing",
        };
        f.write_str(label)
    }
}

/// Everything known about a row that passed the eligibility gate.
#[derive(Debug, Clone, Serialize)]
pub struct StructuringRequest {
    pub raw_svg: String,
    pub image: RenderedImage,
    pub analysis: AnalysisRecord,
    pub composition: Composition,
    pub evaluation: Evaluation,
    pub utterance: String,
    pub config: GlobalConfig,
}

/// Turns a raw traced vector into semantically structured SVG.
#[async_trait]
pub trait Structurer: Send + Sync {
    async fn structure(
        &self,
        request: &StructuringRequest,
        phase: &(dyn Fn(StructuringPhase) + Send + Sync),
    ) -> Result<String>;
}
