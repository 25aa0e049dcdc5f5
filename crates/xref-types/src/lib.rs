//! Core type definitions for external identifier cross-referencing.
//!
//! - [`Tool`]: the closed set of external identifier schemes
//! - [`InternalId`]: shape-checked internal task/epic/feature/doc ids
//! - [`ProjectKey`] and [`CounterKey`]: counter addressing
//! - [`MappingTable`] and [`CounterTable`]: the two persisted payloads

pub mod id;
pub mod table;
pub mod tool;

pub use id::{CounterKey, IdPrefix, InternalId, ProjectKey};
pub use table::{CounterTable, MappingTable};
pub use tool::{IntoTool, Tool};
