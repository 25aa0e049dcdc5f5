//! In-process [`PersistenceProvider`].
//!
//! Holds the last saved copy of each table and counts saves. Save failures
//! can be injected to exercise callers' error paths.

use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;
use xref_error::{Result, XrefError};
use xref_types::{CounterTable, MappingTable};

use crate::PersistenceProvider;

const MEMORY_PATH: &str = "<memory>";

#[derive(Debug, Default)]
struct MemoryState {
    mappings: MappingTable,
    counters: CounterTable,
    mapping_saves: usize,
    counter_saves: usize,
    fail_saves: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `mappings` and `counters` already "on disk".
    #[must_use]
    pub fn with_tables(mappings: MappingTable, counters: CounterTable) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                mappings,
                counters,
                ..MemoryState::default()
            }),
        }
    }

    /// When set, every save fails with an I/O error and stores nothing.
    pub fn fail_saves(&self, fail: bool) {
        self.state.lock().fail_saves = fail;
    }

    #[must_use]
    pub fn mappings(&self) -> MappingTable {
        self.state.lock().mappings.clone()
    }

    #[must_use]
    pub fn counters(&self) -> CounterTable {
        self.state.lock().counters.clone()
    }

    /// Successful `save_mappings` calls so far.
    #[must_use]
    pub fn mapping_saves(&self) -> usize {
        self.state.lock().mapping_saves
    }

    /// Successful `save_counters` calls so far.
    #[must_use]
    pub fn counter_saves(&self) -> usize {
        self.state.lock().counter_saves
    }
}

fn injected_failure(table: &str) -> XrefError {
    XrefError::io(
        PathBuf::from(MEMORY_PATH),
        io::Error::other(format!("injected failure saving {table}")),
    )
}

impl PersistenceProvider for MemoryStore {
    fn load_mappings(&self) -> Result<MappingTable> {
        Ok(self.mappings())
    }

    fn save_mappings(&self, mappings: &MappingTable) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_saves {
            return Err(injected_failure("mappings"));
        }
        state.mappings = mappings.clone();
        state.mapping_saves += 1;
        Ok(())
    }

    fn load_counters(&self) -> Result<CounterTable> {
        Ok(self.counters())
    }

    fn save_counters(&self, counters: &CounterTable) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_saves {
            return Err(injected_failure("counters"));
        }
        state.counters = counters.clone();
        state.counter_saves += 1;
        Ok(())
    }
}
