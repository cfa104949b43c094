//! Ownership and persistence of the working set.

pub mod artifacts;
pub mod persistence;
pub mod rows;
pub mod transfer;
pub mod workspace;

pub use artifacts::{ArtifactLibrary, StructuredVector};
pub use persistence::{FileStore, KeyValueStore, MemoryStore};
pub use rows::{ListQuery, RowStore, SortKey};
pub use transfer::{ImportSource, WorkspaceDocument};
pub use workspace::Workspace;
