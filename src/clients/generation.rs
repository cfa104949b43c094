use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::model::{AnalysisPayload, AnalysisRecord, Composition, GlobalConfig, RenderedImage};

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub utterance: String,
    pub config: GlobalConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositionRequest {
    pub utterance: String,
    pub analysis: AnalysisRecord,
    pub config: GlobalConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderingRequest {
    pub utterance: String,
    pub composition: Composition,
    pub config: GlobalConfig,
}

/// AI service behind the three generation stages.
///
/// Implementations may be slow and may fail; they never see rows or
/// statuses, only the inputs of one stage.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// May return unparsed text; the composition stage parses it before use.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisPayload>;

    async fn compose(&self, request: &CompositionRequest) -> Result<Composition>;

    async fn render(&self, request: &RenderingRequest) -> Result<RenderedImage>;
}
