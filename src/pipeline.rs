//! The pipeline core: stage order, invalidation, stage execution, cascades,
//! eligibility and cancellation.

pub mod cancellation;
pub mod cascade;
pub mod eligibility;
pub mod invalidation;
pub mod processor;
pub mod stage;

pub use cancellation::CancellationRegistry;
pub use cascade::{CascadeReport, CascadeRunner, CascadeState};
pub use eligibility::{Eligibility, IneligibleReason};
pub use invalidation::{ChangePoint, Invalidation};
pub use processor::{StageOutcome, StageProcessor};
pub use stage::Stage;
