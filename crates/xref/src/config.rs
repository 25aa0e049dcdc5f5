//! Engine configuration.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xref_error::{Result, XrefError};
use xref_store::{DEFAULT_STATE_DIR, StoreOptions};

pub const ENV_STATE_DIR: &str = "XREF_STATE_DIR";
pub const ENV_LOCK_TIMEOUT_MS: &str = "XREF_LOCK_TIMEOUT_MS";
pub const ENV_PERSIST: &str = "XREF_PERSIST";

/// How [`crate::open`] builds an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrefConfig {
    /// Directory holding the table files.
    ///
    /// Default: `.claude/state`, relative to the working directory.
    pub state_dir: PathBuf,

    /// `false` builds a memory-only engine and ignores `state_dir`.
    pub persist: bool,

    /// Longest wait for a table lock before a save or load fails.
    pub lock_timeout_ms: u64,

    pub lock_poll_interval_ms: u64,
}

impl Default for XrefConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            persist: true,
            lock_timeout_ms: StoreOptions::DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            lock_poll_interval_ms: StoreOptions::DEFAULT_LOCK_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl XrefConfig {
    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self.persist = true;
        self
    }

    /// Disable persistence.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.persist = false;
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Defaults overlaid with `XREF_STATE_DIR`, `XREF_LOCK_TIMEOUT_MS` and
    /// `XREF_PERSIST` from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var_os(name))
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_STATE_DIR) {
            if dir.is_empty() {
                return Err(config_error(ENV_STATE_DIR, "must not be empty"));
            }
            config.state_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            let text = utf8(ENV_LOCK_TIMEOUT_MS, &raw)?;
            config.lock_timeout_ms = text.trim().parse().map_err(|err| {
                config_error(
                    ENV_LOCK_TIMEOUT_MS,
                    format!("'{text}' is not a millisecond count: {err}"),
                )
            })?;
        }

        if let Some(raw) = lookup(ENV_PERSIST) {
            let text = utf8(ENV_PERSIST, &raw)?;
            config.persist = parse_flag(text)
                .ok_or_else(|| config_error(ENV_PERSIST, format!("'{text}' is not a boolean")))?;
        }

        Ok(config)
    }

    /// Lock timings for the file store.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions::new(
            Duration::from_millis(self.lock_timeout_ms),
            Duration::from_millis(self.lock_poll_interval_ms),
        )
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn utf8<'a>(name: &str, raw: &'a OsString) -> Result<&'a str> {
    raw.to_str()
        .ok_or_else(|| config_error(name, "value is not valid UTF-8"))
}

fn config_error(name: &str, detail: impl std::fmt::Display) -> XrefError {
    XrefError::Config {
        detail: format!("{name}: {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use xref_error::ErrorKind;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), OsString::from(value)))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = XrefConfig::default();
        assert_eq!(config.state_dir, PathBuf::from(".claude/state"));
        assert!(config.persist);
        assert_eq!(config.lock_timeout_ms, 10_000);
        assert_eq!(config.lock_poll_interval_ms, 10);
        assert_eq!(config.store_options(), StoreOptions::default());
    }

    #[test]
    fn builders() {
        let config = XrefConfig::default()
            .in_memory()
            .with_lock_timeout(Duration::from_millis(250));
        assert!(!config.persist);
        assert_eq!(config.store_options().lock_timeout, Duration::from_millis(250));

        let config = config.with_state_dir("/tmp/xref");
        assert!(config.persist, "case=state_dir_enables_persistence");
        assert_eq!(config.state_dir, PathBuf::from("/tmp/xref"));
    }

    #[test]
    fn environment_overlays_defaults() {
        let config = XrefConfig::from_lookup(lookup_in(&[
            (ENV_STATE_DIR, "/var/lib/xref"),
            (ENV_LOCK_TIMEOUT_MS, " 1500 "),
            (ENV_PERSIST, "Off"),
        ]))
        .expect("valid environment");
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/xref"));
        assert_eq!(config.lock_timeout_ms, 1500);
        assert!(!config.persist);
        assert_eq!(config.lock_poll_interval_ms, 10);

        let config = XrefConfig::from_lookup(lookup_in(&[])).expect("empty environment");
        assert_eq!(config, XrefConfig::default());
    }

    #[test]
    fn malformed_environment_is_rejected() {
        for (case, vars) in [
            ("timeout_not_a_number", [(ENV_LOCK_TIMEOUT_MS, "soon")]),
            ("timeout_negative", [(ENV_LOCK_TIMEOUT_MS, "-5")]),
            ("persist_not_a_flag", [(ENV_PERSIST, "maybe")]),
            ("empty_state_dir", [(ENV_STATE_DIR, "")]),
        ] {
            let err = XrefConfig::from_lookup(lookup_in(&vars)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "case={case}");
            assert!(err.to_string().contains("XREF_"), "case={case}: {err}");
        }
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: XrefConfig =
            serde_json::from_str(r#"{"state_dir": "/data", "lock_timeout_ms": 50}"#)
                .expect("deserialize");
        assert_eq!(config.state_dir, PathBuf::from("/data"));
        assert_eq!(config.lock_timeout_ms, 50);
        assert!(config.persist, "case=missing_fields_default");
    }
}
