#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod util;

pub use app::{EditResult, ImportSummary, RowEdit, Studio, StudioBuilder};
