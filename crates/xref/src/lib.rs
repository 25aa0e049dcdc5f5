//! External identifier cross-reference service.
//!
//! Mints external ticket identifiers (`PROJ-7`, `42`) for internal ids such
//! as `TASK-E01-b2c4`, looks them up in both directions, and keeps the
//! mapping and counter tables durable across restarts and crashes.
//!
//! ```no_run
//! let mapper = xref::open(&xref::XrefConfig::default())?;
//! let external = mapper.map_to_external("TASK-E01-b2c4", "jira", Some("proj"))?;
//! assert_eq!(mapper.get_internal_id(&external, "jira")?.as_deref(), Some("TASK-E01-b2c4"));
//! # Ok::<(), xref::XrefError>(())
//! ```

pub mod config;
pub mod shared;

use std::sync::Arc;

use tracing::info;

pub use config::XrefConfig;
pub use shared::SharedMapper;
pub use xref_core::IdMapper;
pub use xref_error::{ErrorKind, Result, XrefError};
pub use xref_store::{
    JsonFileStore, MemoryStore, PersistenceProvider, StoreEvent, StoreEventLog, StoreObserver,
    StoreOptions,
};
pub use xref_types::{
    CounterKey, CounterTable, InternalId, IntoTool, MappingTable, ProjectKey, Tool,
};

/// Build an engine from `config`, loading persisted tables if enabled.
pub fn open(config: &XrefConfig) -> Result<IdMapper> {
    if !config.persist {
        info!("opening in-memory identifier mapper");
        return Ok(IdMapper::in_memory());
    }
    let store = JsonFileStore::with_options(&config.state_dir, config.store_options())?;
    info!(state_dir = %config.state_dir.display(), "opening identifier mapper");
    IdMapper::with_store(Arc::new(store))
}

/// An engine with no persistence.
#[must_use]
pub fn open_in_memory() -> IdMapper {
    IdMapper::in_memory()
}
