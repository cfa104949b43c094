//! Row entity and the payload types each pipeline stage produces.

pub mod analysis;
pub mod composition;
pub mod evaluation;
pub mod image;
pub mod row;
pub mod settings;
pub mod status;

pub use analysis::{AnalysisPayload, AnalysisRecord};
pub use composition::{Composition, ElementSpec, ElementTree, NodeId};
pub use evaluation::{Evaluation, EvaluationScores};
pub use image::RenderedImage;
pub use row::{Row, RowId, RowPatch, StageDurations};
pub use settings::{AspectRatio, GeoContext, GlobalConfig};
pub use status::{StageStatus, StageStatuses};
