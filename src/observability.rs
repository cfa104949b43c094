pub mod activity;
pub mod metrics;
pub mod tracing;

pub use activity::{ActivityLog, LogEntry, Severity};
pub use metrics::Metrics;
