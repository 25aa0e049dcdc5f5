//! The two persisted tables.
//!
//! Both serialize to exactly the payload shape written inside the on-disk
//! envelope, so typed deserialization doubles as shape validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xref_error::{Result, XrefError};

use crate::id::CounterKey;
use crate::tool::Tool;

/// `internal id -> {tool -> external id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    entries: BTreeMap<String, BTreeMap<Tool, String>>,
}

impl MappingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// External id recorded for `(internal_id, tool)`.
    #[must_use]
    pub fn get(&self, internal_id: &str, tool: Tool) -> Option<&str> {
        self.entries
            .get(internal_id)
            .and_then(|tools| tools.get(&tool))
            .map(String::as_str)
    }

    /// Every tool mapping of `internal_id`.
    #[must_use]
    pub fn tools_for(&self, internal_id: &str) -> Option<&BTreeMap<Tool, String>> {
        self.entries.get(internal_id)
    }

    /// Record a mapping. Returns the previously stored external id, if any.
    pub fn insert(
        &mut self,
        internal_id: impl Into<String>,
        tool: Tool,
        external_id: impl Into<String>,
    ) -> Option<String> {
        self.entries
            .entry(internal_id.into())
            .or_default()
            .insert(tool, external_id.into())
    }

    /// Remove one mapping, dropping the internal id once it has none left.
    pub fn remove(&mut self, internal_id: &str, tool: Tool) -> Option<String> {
        let tools = self.entries.get_mut(internal_id)?;
        let removed = tools.remove(&tool);
        if tools.is_empty() {
            self.entries.remove(internal_id);
        }
        removed
    }

    /// Number of internal ids with at least one mapping.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate `(internal_id, tool, external_id)` triples in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Tool, &str)> {
        self.entries.iter().flat_map(|(internal_id, tools)| {
            tools
                .iter()
                .map(move |(tool, external)| (internal_id.as_str(), *tool, external.as_str()))
        })
    }
}

/// Every counter, laid out as persisted: per-key maps for keyed tools and a
/// scalar for each unkeyed tool. Missing tools load as zero/empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTable {
    #[serde(default)]
    pub jira: BTreeMap<String, u64>,
    #[serde(default)]
    pub azure_devops: u64,
    #[serde(default)]
    pub linear: BTreeMap<String, u64>,
    #[serde(default)]
    pub github: u64,
}

impl CounterTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value; zero for a counter never used.
    #[must_use]
    pub fn get(&self, key: &CounterKey) -> u64 {
        match key {
            CounterKey::Keyed { tool, key } => self
                .keyed(*tool)
                .and_then(|counters| counters.get(key.as_str()))
                .copied()
                .unwrap_or(0),
            CounterKey::Global(Tool::AzureDevops) => self.azure_devops,
            CounterKey::Global(Tool::Github) => self.github,
            CounterKey::Global(_) => 0,
        }
    }

    /// Pre-increment the counter and return the new value.
    pub fn advance(&mut self, key: &CounterKey) -> Result<u64> {
        let slot = self.slot_mut(key)?;
        let next = slot
            .checked_add(1)
            .ok_or_else(|| XrefError::internal(format!("counter {key} overflowed u64")))?;
        *slot = next;
        Ok(next)
    }

    /// Put a counter back to `value`; used to undo an allocation that could
    /// not be persisted. Restoring zero forgets a keyed counter entirely.
    pub fn restore(&mut self, key: &CounterKey, value: u64) -> Result<()> {
        if let CounterKey::Keyed { tool, key: project } = key {
            if value == 0 {
                if let Some(counters) = self.keyed_mut(*tool) {
                    counters.remove(project.as_str());
                }
                return Ok(());
            }
        }
        *self.slot_mut(key)? = value;
        Ok(())
    }

    /// Lift a counter to at least `floor`. Returns whether it moved.
    pub fn raise_to(&mut self, key: &CounterKey, floor: u64) -> Result<bool> {
        if self.get(key) >= floor {
            return Ok(false);
        }
        *self.slot_mut(key)? = floor;
        Ok(true)
    }

    /// Per-key counters of a keyed tool; `None` for unkeyed tools.
    #[must_use]
    pub fn keyed(&self, tool: Tool) -> Option<&BTreeMap<String, u64>> {
        match tool {
            Tool::Jira => Some(&self.jira),
            Tool::Linear => Some(&self.linear),
            Tool::AzureDevops | Tool::Github => None,
        }
    }

    fn keyed_mut(&mut self, tool: Tool) -> Option<&mut BTreeMap<String, u64>> {
        match tool {
            Tool::Jira => Some(&mut self.jira),
            Tool::Linear => Some(&mut self.linear),
            Tool::AzureDevops | Tool::Github => None,
        }
    }

    fn slot_mut(&mut self, key: &CounterKey) -> Result<&mut u64> {
        match key {
            CounterKey::Keyed { tool, key: project } => {
                let counters = self.keyed_mut(*tool).ok_or_else(|| {
                    XrefError::internal(format!("tool {tool} has no keyed counters"))
                })?;
                Ok(counters.entry(project.as_str().to_owned()).or_insert(0))
            }
            CounterKey::Global(Tool::AzureDevops) => Ok(&mut self.azure_devops),
            CounterKey::Global(Tool::Github) => Ok(&mut self.github),
            CounterKey::Global(tool) => Err(XrefError::internal(format!(
                "tool {tool} has no global counter"
            ))),
        }
    }
}
