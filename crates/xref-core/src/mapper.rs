//! The mapping engine.
//!
//! One mutex covers validate, lookup, allocate, record and persist. Saves
//! therefore reach the provider in the same order as the in-memory changes
//! they describe, and a save that fails is undone before the lock is
//! released, so no caller ever observes an allocation that was not stored.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use xref_error::Result;
use xref_store::PersistenceProvider;
use xref_types::{CounterKey, CounterTable, InternalId, IntoTool, MappingTable, Tool};

#[derive(Debug, Default)]
struct MapperState {
    mappings: MappingTable,
    counters: CounterTable,
    /// `(tool, external id) -> internal id`. On a collision the entry recorded
    /// first is kept.
    reverse: HashMap<(Tool, String), String>,
}

impl MapperState {
    /// Build the in-memory state from loaded tables.
    ///
    /// The two tables recover independently, so the counters may lag the
    /// mappings (an older backup, or the empty default). Every counter is
    /// lifted to the highest value already issued under it, so the next
    /// allocation cannot hand out an id that is already owned.
    fn from_tables(mappings: MappingTable, mut counters: CounterTable) -> Self {
        let mut reverse = HashMap::with_capacity(mappings.len());
        for (internal, tool, external) in mappings.iter() {
            reverse
                .entry((tool, external.to_owned()))
                .or_insert_with(|| internal.to_owned());

            let Some((key, issued)) = CounterKey::parse_external(tool, external) else {
                continue;
            };
            let stored = counters.get(&key);
            match counters.raise_to(&key, issued) {
                Ok(true) => warn!(
                    tool = key.tool().as_str(),
                    counter = %key,
                    stored,
                    issued,
                    "counter behind loaded mappings, raised"
                ),
                Ok(false) => {}
                Err(err) => error!(counter = %key, error = %err, "failed to reconcile counter"),
            }
        }
        Self {
            mappings,
            counters,
            reverse,
        }
    }

    fn record(&mut self, internal_id: &str, tool: Tool, external_id: &str) {
        self.mappings.insert(internal_id, tool, external_id);
        self.reverse
            .entry((tool, external_id.to_owned()))
            .or_insert_with(|| internal_id.to_owned());
    }

    fn forget(&mut self, internal_id: &str, tool: Tool) {
        let Some(external_id) = self.mappings.remove(internal_id, tool) else {
            return;
        };
        let reverse_key = (tool, external_id);
        if self
            .reverse
            .get(&reverse_key)
            .is_some_and(|owner| owner == internal_id)
        {
            self.reverse.remove(&reverse_key);
        }
    }

    fn rollback_counter(&mut self, key: &CounterKey, previous: u64) {
        if let Err(err) = self.counters.restore(key, previous) {
            error!(counter = %key, previous, error = %err, "failed to roll back counter");
        }
    }
}

/// Thread-safe identifier mapping engine.
pub struct IdMapper {
    state: Mutex<MapperState>,
    store: Option<Arc<dyn PersistenceProvider>>,
}

impl fmt::Debug for IdMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdMapper")
            .field("mappings", &self.mapping_count())
            .field("has_store", &self.has_store())
            .finish_non_exhaustive()
    }
}

impl Default for IdMapper {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl IdMapper {
    /// An engine with no persistence; state lives as long as the value.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(MapperState::default()),
            store: None,
        }
    }

    /// Load both tables from `store` and persist every later change to it.
    pub fn with_store(store: Arc<dyn PersistenceProvider>) -> Result<Self> {
        let mappings = store.load_mappings()?;
        let counters = store.load_counters()?;
        info!(mappings = mappings.len(), "loaded identifier tables");
        Ok(Self {
            state: Mutex::new(MapperState::from_tables(mappings, counters)),
            store: Some(store),
        })
    }

    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Number of internal ids with at least one mapping.
    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    /// Return the external id for `internal_id` in `tool`, minting one if
    /// none exists yet.
    ///
    /// Arguments are validated in the order tool, key, internal id. Keyed
    /// tools (`jira`, `linear`) require a non-empty `key`, which is
    /// uppercased; unkeyed tools ignore it. A repeat request returns the
    /// stored id without advancing any counter, even if `key` differs from
    /// the one used originally.
    pub fn map_to_external<T: IntoTool>(
        &self,
        internal_id: &str,
        tool: T,
        key: Option<&str>,
    ) -> Result<String> {
        let tool = tool.into_tool()?;
        let counter_key = CounterKey::resolve(tool, key)?;
        let internal = InternalId::parse(internal_id)?;

        let mut state = self.state.lock();
        if let Some(existing) = state.mappings.get(internal.as_str(), tool) {
            debug!(
                internal_id = internal.as_str(),
                tool = tool.as_str(),
                external_id = existing,
                "external id already mapped"
            );
            return Ok(existing.to_owned());
        }

        let previous = state.counters.get(&counter_key);
        let value = state.counters.advance(&counter_key)?;
        let external_id = counter_key.format_external(value);
        state.record(internal.as_str(), tool, &external_id);

        if let Err(err) = self.persist_all(&state) {
            state.forget(internal.as_str(), tool);
            state.rollback_counter(&counter_key, previous);
            error!(
                internal_id = internal.as_str(),
                tool = tool.as_str(),
                external_id = %external_id,
                error = %err,
                "failed to persist new mapping, rolled back"
            );
            return Err(err);
        }

        info!(
            internal_id = internal.as_str(),
            tool = tool.as_str(),
            counter = %counter_key,
            external_id = %external_id,
            "created external id mapping"
        );
        Ok(external_id)
    }

    /// Reverse lookup, exact and case-sensitive, scoped to `tool`.
    pub fn get_internal_id<T: IntoTool>(
        &self,
        external_id: &str,
        tool: T,
    ) -> Result<Option<String>> {
        let tool = tool.into_tool()?;
        let state = self.state.lock();
        Ok(state.reverse.get(&(tool, external_id.to_owned())).cloned())
    }

    /// Advance the counter for `tool` (and `key`) without creating a mapping.
    pub fn increment_counter<T: IntoTool>(&self, tool: T, key: Option<&str>) -> Result<u64> {
        let tool = tool.into_tool()?;
        let counter_key = CounterKey::resolve(tool, key)?;

        let mut state = self.state.lock();
        let previous = state.counters.get(&counter_key);
        let value = state.counters.advance(&counter_key)?;

        if let Some(store) = &self.store {
            if let Err(err) = store.save_counters(&state.counters) {
                state.rollback_counter(&counter_key, previous);
                error!(counter = %counter_key, error = %err, "failed to persist counter, rolled back");
                return Err(err);
            }
        }

        debug!(counter = %counter_key, value, "advanced counter");
        Ok(value)
    }

    /// Every tool mapping for `internal_id`, as an independent copy.
    #[must_use]
    pub fn get_all_mappings(&self, internal_id: &str) -> BTreeMap<Tool, String> {
        self.state
            .lock()
            .mappings
            .tools_for(internal_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every counter.
    #[must_use]
    pub fn get_counter_status(&self) -> CounterTable {
        self.state.lock().counters.clone()
    }

    /// Set every counter back to zero.
    pub fn reset_counters(&self) -> Result<()> {
        let mut state = self.state.lock();
        let previous = std::mem::take(&mut state.counters);
        if let Some(store) = &self.store {
            if let Err(err) = store.save_counters(&state.counters) {
                state.counters = previous;
                error!(error = %err, "failed to persist counter reset");
                return Err(err);
            }
        }
        info!("reset all counters");
        Ok(())
    }

    /// Drop every mapping. Counters are left as they are.
    pub fn clear_mappings(&self) -> Result<()> {
        let mut state = self.state.lock();
        let previous = std::mem::take(&mut state.mappings);
        if let Some(store) = &self.store {
            if let Err(err) = store.save_mappings(&state.mappings) {
                state.mappings = previous;
                error!(error = %err, "failed to persist mapping clear");
                return Err(err);
            }
        }
        let cleared = previous.len();
        state.reverse.clear();
        info!(cleared, "cleared all mappings");
        Ok(())
    }

    /// Counters first: a crash between the two writes leaves a skipped
    /// counter value, never a reused one.
    fn persist_all(&self, state: &MapperState) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save_counters(&state.counters)?;
        store.save_mappings(&state.mappings)
    }
}
