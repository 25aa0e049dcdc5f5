//! JSON file-backed [`PersistenceProvider`].
//!
//! Layout under the store root, per table:
//!
//! | file                    | role                                   |
//! |-------------------------|----------------------------------------|
//! | `<name>`                | primary document                       |
//! | `<name>.bak`            | previous primary, one generation       |
//! | `<name>.lock`           | lock file, present only while held     |
//! | `.tmp_<name>`           | staging file for the atomic replace    |

use std::fmt;
use std::fs::{self, OpenOptions};
#[cfg(unix)]
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use xref_error::{Result, XrefError};
use xref_types::{CounterTable, MappingTable};

use crate::PersistenceProvider;
use crate::envelope::{PersistedState, TableKind, TablePayload, encode_document, now_rfc3339};
use crate::lock::TableLock;
use crate::telemetry::{
    NoOpStoreObserver, StoreEvent, StoreMetrics, StoreMetricsSnapshot, StoreObserver,
};

pub const MAPPING_FILE: &str = "external_id_mapping.json";
pub const COUNTER_FILE: &str = "external_id_counters.json";

/// Store root used when none is configured, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".claude/state";

const BACKUP_SUFFIX: &str = ".bak";
const LOCK_SUFFIX: &str = ".lock";
const TEMP_PREFIX: &str = ".tmp_";

/// Lock timings for a [`JsonFileStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Upper bound on waiting for a table lock before failing with
    /// [`XrefError::LockTimeout`].
    pub lock_timeout: Duration,
    /// Sleep between non-blocking lock attempts.
    pub lock_poll_interval: Duration,
}

impl StoreOptions {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

    #[must_use]
    pub const fn new(lock_timeout: Duration, lock_poll_interval: Duration) -> Self {
        Self {
            lock_timeout,
            lock_poll_interval,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOCK_TIMEOUT, Self::DEFAULT_LOCK_POLL_INTERVAL)
    }
}

/// Resolved file paths for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    pub primary: PathBuf,
    pub backup: PathBuf,
    pub lock: PathBuf,
    pub temp: PathBuf,
}

impl TablePaths {
    #[must_use]
    pub fn new(root: &Path, table: TableKind) -> Self {
        let name = table.file_name();
        Self {
            primary: root.join(name),
            backup: root.join(format!("{name}{BACKUP_SUFFIX}")),
            lock: root.join(format!("{name}{LOCK_SUFFIX}")),
            temp: root.join(format!("{TEMP_PREFIX}{name}")),
        }
    }
}

/// Where a loaded payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// The primary document validated.
    Primary,
    /// No primary document existed; the empty table was returned.
    Missing,
    /// The primary was unusable and the backup was used.
    Backup,
    /// Neither document was usable; the empty table was returned.
    Default,
}

impl LoadSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Missing => "missing",
            Self::Backup => "backup",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table storage in a directory of JSON documents.
///
/// Every operation takes the table's lock for its whole duration, so any
/// number of stores (in this or other processes) may share one root.
pub struct JsonFileStore {
    root: PathBuf,
    options: StoreOptions,
    observer: Arc<dyn StoreObserver>,
    metrics: StoreMetrics,
}

impl fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFileStore")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(root, StoreOptions::default())
    }

    pub fn with_options(root: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let store = Self {
            root: root.into(),
            options,
            observer: Arc::new(NoOpStoreObserver),
            metrics: StoreMetrics::default(),
        };
        store.ensure_root()?;
        debug!(root = %store.root.display(), "opened json file store");
        Ok(store)
    }

    /// Route telemetry events to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn options(&self) -> StoreOptions {
        self.options
    }

    #[must_use]
    pub fn paths(&self, table: TableKind) -> TablePaths {
        TablePaths::new(&self.root, table)
    }

    #[must_use]
    pub fn metrics(&self) -> StoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Back up the current primary and atomically replace it with `payload`.
    pub fn save_table<P: TablePayload>(&self, payload: &P) -> Result<()> {
        let table = P::TABLE;
        let paths = self.paths(table);
        let result = self.save_locked(payload, &paths);
        if let Err(err) = &result {
            error!(
                table = table.as_str(),
                path = %paths.primary.display(),
                error = %err,
                "failed to save table"
            );
        }
        result
    }

    /// Load a table, recovering from the backup at most once.
    ///
    /// Corruption never surfaces as an error. Lock and directory failures do,
    /// as does a primary that exists but cannot be read.
    pub fn load_table<P: TablePayload>(&self) -> Result<P> {
        let table = P::TABLE;
        let paths = self.paths(table);
        self.ensure_root()?;
        let _lock = self.lock_table(table, &paths)?;

        let (payload, source) = self.read_validated::<P>(&paths)?;
        info!(
            table = table.as_str(),
            path = %paths.primary.display(),
            source = source.as_str(),
            "loaded table"
        );
        self.emit(&StoreEvent::TableLoaded { table, source });
        Ok(payload)
    }

    fn save_locked<P: TablePayload>(&self, payload: &P, paths: &TablePaths) -> Result<()> {
        let table = P::TABLE;
        self.ensure_root()?;
        let _lock = self.lock_table(table, paths)?;

        let backed_up = copy_to_backup(paths)?;
        let updated = now_rfc3339()?;
        let bytes = encode_document(payload, &updated)?;
        replace_atomically(&paths.temp, &paths.primary, &bytes)?;

        info!(
            table = table.as_str(),
            path = %paths.primary.display(),
            bytes = bytes.len(),
            backed_up,
            "saved table"
        );
        self.emit(&StoreEvent::TableSaved {
            table,
            bytes_written: bytes.len() as u64,
            backed_up,
        });
        Ok(())
    }

    fn read_validated<P: TablePayload>(&self, paths: &TablePaths) -> Result<(P, LoadSource)> {
        let table = P::TABLE;
        let bytes = match fs::read(&paths.primary) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(
                    table = table.as_str(),
                    path = %paths.primary.display(),
                    "no table file, starting empty"
                );
                return Ok((P::default(), LoadSource::Missing));
            }
            // Present but unreadable says nothing about its contents, so the
            // backup must not replace it.
            Err(err) => return Err(XrefError::io(&paths.primary, err)),
        };

        match PersistedState::<P>::decode(&bytes) {
            Ok(state) => Ok((state.payload, LoadSource::Primary)),
            Err(reason) => {
                warn!(
                    table = table.as_str(),
                    path = %paths.primary.display(),
                    reason = %reason,
                    "table file failed validation, trying backup"
                );
                Ok(self.recover_from_backup(paths, &reason))
            }
        }
    }

    /// Single recovery hop: the backup is either valid or we fall back to the
    /// empty table. The backup itself is never recovered from.
    fn recover_from_backup<P: TablePayload>(
        &self,
        paths: &TablePaths,
        primary_reason: &str,
    ) -> (P, LoadSource) {
        let table = P::TABLE;
        let backup_reason = match fs::read(&paths.backup) {
            Ok(bytes) => match PersistedState::<P>::decode(&bytes) {
                Ok(state) => {
                    warn!(
                        table = table.as_str(),
                        path = %paths.backup.display(),
                        updated = %state.updated,
                        "recovered table from backup"
                    );
                    if let Err(err) = replace_atomically(&paths.temp, &paths.primary, &bytes) {
                        warn!(
                            table = table.as_str(),
                            path = %paths.primary.display(),
                            error = %err,
                            "failed to restore primary from backup"
                        );
                    }
                    self.emit(&StoreEvent::BackupRecovered { table });
                    return (state.payload, LoadSource::Backup);
                }
                Err(reason) => reason,
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => "no backup file".to_owned(),
            Err(err) => format!("unreadable: {err}"),
        };

        error!(
            table = table.as_str(),
            path = %paths.primary.display(),
            primary = %primary_reason,
            backup = %backup_reason,
            "table and backup unusable, using empty table"
        );
        self.emit(&StoreEvent::DefaultFallback {
            table,
            reason: format!("primary: {primary_reason}; backup: {backup_reason}"),
        });
        (P::default(), LoadSource::Default)
    }

    fn lock_table(&self, table: TableKind, paths: &TablePaths) -> Result<TableLock> {
        let lock = TableLock::acquire(
            &paths.lock,
            self.options.lock_timeout,
            self.options.lock_poll_interval,
        )?;
        if lock.was_contended() {
            let waited_us = lock.waited().as_micros() as u64;
            warn!(
                table = table.as_str(),
                path = %lock.path().display(),
                waited_us,
                "table lock was contended"
            );
            self.emit(&StoreEvent::LockContended { table, waited_us });
        }
        Ok(lock)
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|err| XrefError::io(&self.root, err))
    }

    fn emit(&self, event: &StoreEvent) {
        self.metrics.record(event);
        self.observer.on_event(event);
    }
}

impl PersistenceProvider for JsonFileStore {
    fn load_mappings(&self) -> Result<MappingTable> {
        self.load_table()
    }

    fn save_mappings(&self, mappings: &MappingTable) -> Result<()> {
        self.save_table(mappings)
    }

    fn load_counters(&self) -> Result<CounterTable> {
        self.load_table()
    }

    fn save_counters(&self, counters: &CounterTable) -> Result<()> {
        self.save_table(counters)
    }
}

/// Copy the primary verbatim to the backup. Returns whether a primary existed.
fn copy_to_backup(paths: &TablePaths) -> Result<bool> {
    match fs::copy(&paths.primary, &paths.backup) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !paths.primary.exists() => Ok(false),
        Err(err) => Err(XrefError::io(&paths.backup, err)),
    }
}

/// Write `bytes` to `temp`, fsync, and rename over `target`.
///
/// On failure the staging file is removed and `target` is untouched.
fn replace_atomically(temp: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    if let Err(err) = write_synced(temp, bytes) {
        discard(temp);
        return Err(XrefError::io(temp, err));
    }
    if let Err(err) = fs::rename(temp, target) {
        discard(temp);
        return Err(XrefError::io(target, err));
    }
    sync_parent(target);
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove staging file");
        }
    }
}

/// Best effort: persist the rename itself.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(path = %parent.display(), error = %err, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
