//! Internal identifiers and counter addressing.

use std::fmt;

use xref_error::{Result, XrefError};

use crate::tool::Tool;

/// Record family encoded in the first segment of an internal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdPrefix {
    Task,
    Epic,
    Feat,
    Doc,
}

impl IdPrefix {
    pub const ALL: [Self; 4] = [Self::Task, Self::Epic, Self::Feat, Self::Doc];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "TASK",
            Self::Epic => "EPIC",
            Self::Feat => "FEAT",
            Self::Doc => "DOC",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|prefix| prefix.as_str() == segment)
    }
}

/// Shape-checked internal identifier: `{PREFIX}-{segment}-{segment}`.
///
/// Minted elsewhere; this type only validates. Segments after the prefix are
/// opaque and must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId {
    raw: String,
    prefix: IdPrefix,
}

impl InternalId {
    /// Minimum number of `-`-separated segments, prefix included.
    pub const MIN_SEGMENTS: usize = 3;

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(XrefError::invalid_format(raw, "internal id cannot be empty"));
        }

        let segments: Vec<&str> = raw.split('-').collect();
        if segments.len() < Self::MIN_SEGMENTS || segments.iter().any(|s| s.is_empty()) {
            return Err(XrefError::invalid_format(
                raw,
                "invalid internal id format, expected {PREFIX}-{segment}-{segment}",
            ));
        }

        let prefix = IdPrefix::from_segment(segments[0]).ok_or_else(|| {
            XrefError::invalid_format(
                raw,
                format!(
                    "invalid internal id prefix '{}', expected one of TASK, EPIC, FEAT, DOC",
                    segments[0]
                ),
            )
        })?;

        Ok(Self {
            raw: raw.to_owned(),
            prefix,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn prefix(&self) -> IdPrefix {
        self.prefix
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Project or team key, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Normalize a raw key; `None` when the key is empty.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.to_uppercase()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a single counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterKey {
    /// Per-key counter of a keyed tool (`jira`, `linear`).
    Keyed { tool: Tool, key: ProjectKey },
    /// The single counter of an unkeyed tool (`azure_devops`, `github`).
    Global(Tool),
}

impl CounterKey {
    /// Resolve the counter for `tool`, normalizing `key`.
    ///
    /// Keyed tools require a non-empty key. A key passed for an unkeyed tool
    /// is ignored.
    pub fn resolve(tool: Tool, key: Option<&str>) -> Result<Self> {
        if !tool.is_keyed() {
            return Ok(Self::Global(tool));
        }
        key.and_then(ProjectKey::normalize)
            .map(|key| Self::Keyed { tool, key })
            .ok_or_else(|| XrefError::MissingKey {
                tool: tool.as_str().to_owned(),
            })
    }

    #[must_use]
    pub const fn tool(&self) -> Tool {
        match self {
            Self::Keyed { tool, .. } | Self::Global(tool) => *tool,
        }
    }

    /// Render an external id: `{KEY}-{n}` for keyed tools, `{n}` otherwise.
    #[must_use]
    pub fn format_external(&self, value: u64) -> String {
        match self {
            Self::Keyed { key, .. } => format!("{key}-{value}"),
            Self::Global(_) => value.to_string(),
        }
    }

    /// Inverse of [`Self::format_external`]: the counter that would have
    /// produced `external_id` for `tool`, and its value.
    ///
    /// `None` when the id does not have the shape `tool` mints.
    #[must_use]
    pub fn parse_external(tool: Tool, external_id: &str) -> Option<(Self, u64)> {
        if !tool.is_keyed() {
            let value = external_id.parse().ok()?;
            return Some((Self::Global(tool), value));
        }
        let (key, value) = external_id.rsplit_once('-')?;
        let value = value.parse().ok()?;
        let key = ProjectKey::normalize(key)?;
        Some((Self::Keyed { tool, key }, value))
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyed { tool, key } => write!(f, "{tool}:{key}"),
            Self::Global(tool) => write!(f, "{tool}"),
        }
    }
}
