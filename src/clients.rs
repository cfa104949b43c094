//! External collaborators of the pipeline and their HTTP implementation.

pub mod generation;
pub mod http;
pub mod structuring;
pub mod vectorizer;

pub use generation::{AnalysisRequest, CompositionRequest, GenerationClient, RenderingRequest};
pub use http::HttpGenerationClient;
pub use structuring::{Structurer, StructuringPhase, StructuringRequest};
pub use vectorizer::Vectorizer;
