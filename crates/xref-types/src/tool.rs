//! External identifier schemes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xref_error::{Result, XrefError};

/// A supported third-party project-management tool.
///
/// Keyed tools scope their sequence numbers by a project or team key; unkeyed
/// tools share one global counter per tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Jira,
    AzureDevops,
    Linear,
    Github,
}

impl Tool {
    /// Every supported tool, in wire order.
    pub const ALL: [Self; 4] = [Self::Jira, Self::AzureDevops, Self::Linear, Self::Github];

    /// Wire name used in persisted tables and accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::AzureDevops => "azure_devops",
            Self::Linear => "linear",
            Self::Github => "github",
        }
    }

    /// Whether identifiers for this tool are scoped by a project/team key.
    #[must_use]
    pub const fn is_keyed(self) -> bool {
        matches!(self, Self::Jira | Self::Linear)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = XrefError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| XrefError::UnsupportedTool { tool: s.to_owned() })
    }
}

/// Conversion accepted wherever an API takes a tool argument.
///
/// Lets callers pass either a typed [`Tool`] or a tool name as received from
/// a command line; names that do not parse fail with `UnsupportedTool`.
pub trait IntoTool {
    fn into_tool(self) -> Result<Tool>;
}

impl IntoTool for Tool {
    fn into_tool(self) -> Result<Tool> {
        Ok(self)
    }
}

impl IntoTool for &str {
    fn into_tool(self) -> Result<Tool> {
        self.parse()
    }
}

impl IntoTool for &String {
    fn into_tool(self) -> Result<Tool> {
        self.as_str().parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xref_error::ErrorKind;

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for tool in Tool::ALL {
            assert_eq!(tool.as_str().parse::<Tool>().unwrap(), tool);
        }
    }

    #[test]
    fn keyed_tools() {
        assert!(Tool::Jira.is_keyed());
        assert!(Tool::Linear.is_keyed());
        assert!(!Tool::AzureDevops.is_keyed());
        assert!(!Tool::Github.is_keyed());
    }

    #[test]
    fn unknown_tool_is_unsupported() {
        let err = "trello".parse::<Tool>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTool);
        assert!(err.to_string().contains("trello"));
    }

    #[test]
    fn tool_names_are_case_sensitive() {
        assert!("Jira".parse::<Tool>().is_err());
        assert!("GITHUB".parse::<Tool>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Tool::AzureDevops).unwrap();
        assert_eq!(json, "\"azure_devops\"");
        let back: Tool = serde_json::from_str("\"github\"").unwrap();
        assert_eq!(back, Tool::Github);
    }

    #[test]
    fn into_tool_accepts_names_and_values() {
        assert_eq!(Tool::Linear.into_tool().unwrap(), Tool::Linear);
        assert_eq!("jira".into_tool().unwrap(), Tool::Jira);
        let owned = String::from("github");
        assert_eq!((&owned).into_tool().unwrap(), Tool::Github);
    }
}
