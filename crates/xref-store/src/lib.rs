//! Persistence provider for the identifier mapping and counter tables.
//!
//! Each table lives in its own JSON document wrapped in a versioned envelope.
//! Saves are serialized by a per-table lock file, copy the current document
//! to a one-generation backup, and replace the primary atomically. Loads
//! validate the envelope and fall back to the backup exactly once before
//! returning the table's empty default.
//!
//! The provider knows nothing about identifier semantics; the typed payloads
//! from `xref-types` supply shape validation through deserialization.

pub mod envelope;
pub mod file_store;
pub mod lock;
pub mod memory;
pub mod telemetry;

pub use envelope::{PersistedState, SCHEMA_VERSION, TableKind, TablePayload};
pub use file_store::{
    COUNTER_FILE, DEFAULT_STATE_DIR, JsonFileStore, LoadSource, MAPPING_FILE, StoreOptions,
    TablePaths,
};
pub use lock::TableLock;
pub use memory::MemoryStore;
pub use telemetry::{
    NoOpStoreObserver, StoreEvent, StoreEventLog, StoreMetrics, StoreMetricsSnapshot,
    StoreObserver,
};

use std::sync::Arc;

use xref_error::Result;
use xref_types::{CounterTable, MappingTable};

/// Durable storage for the two tables.
///
/// Implementations must be safe to call from several threads at once and must
/// never report a failed save as success. Loads of a missing or unrecoverable
/// table return the empty default rather than an error.
pub trait PersistenceProvider: Send + Sync {
    fn load_mappings(&self) -> Result<MappingTable>;

    fn save_mappings(&self, mappings: &MappingTable) -> Result<()>;

    fn load_counters(&self) -> Result<CounterTable>;

    fn save_counters(&self, counters: &CounterTable) -> Result<()>;
}

impl<T: PersistenceProvider + ?Sized> PersistenceProvider for Arc<T> {
    fn load_mappings(&self) -> Result<MappingTable> {
        (**self).load_mappings()
    }

    fn save_mappings(&self, mappings: &MappingTable) -> Result<()> {
        (**self).save_mappings(mappings)
    }

    fn load_counters(&self) -> Result<CounterTable> {
        (**self).load_counters()
    }

    fn save_counters(&self, counters: &CounterTable) -> Result<()> {
        (**self).save_counters(counters)
    }
}
