//! Structured store telemetry.
//!
//! Observers receive one [`StoreEvent`] per notable table operation. They
//! run on the caller's thread while the table lock is held, so they MUST NOT
//! block or touch the store. Counters in [`StoreMetrics`] are always kept and
//! use relaxed atomics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::envelope::TableKind;
use crate::file_store::LoadSource;

/// Telemetry event emitted by [`crate::JsonFileStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreEvent {
    /// A table document was written and renamed into place.
    TableSaved {
        table: TableKind,
        bytes_written: u64,
        /// Whether a previous primary was copied to the backup first.
        backed_up: bool,
    },

    /// A load finished; `source` says where the returned payload came from.
    TableLoaded { table: TableKind, source: LoadSource },

    /// The primary failed validation and the backup was used instead.
    BackupRecovered { table: TableKind },

    /// Neither primary nor backup was usable; the empty default was returned.
    DefaultFallback { table: TableKind, reason: String },

    /// The table lock was held by someone else when first requested.
    LockContended { table: TableKind, waited_us: u64 },
}

impl StoreEvent {
    #[must_use]
    pub const fn table(&self) -> TableKind {
        match self {
            Self::TableSaved { table, .. }
            | Self::TableLoaded { table, .. }
            | Self::BackupRecovered { table }
            | Self::DefaultFallback { table, .. }
            | Self::LockContended { table, .. } => *table,
        }
    }

    /// Short classification label for this event kind.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::TableSaved { .. } => "table_saved",
            Self::TableLoaded { .. } => "table_loaded",
            Self::BackupRecovered { .. } => "backup_recovered",
            Self::DefaultFallback { .. } => "default_fallback",
            Self::LockContended { .. } => "lock_contended",
        }
    }
}

/// Receiver of store telemetry.
pub trait StoreObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStoreObserver;

impl StoreObserver for NoOpStoreObserver {
    #[inline]
    fn on_event(&self, _event: &StoreEvent) {}
}

/// Bounded in-memory log keeping the most recent events.
#[derive(Debug)]
pub struct StoreEventLog {
    events: parking_lot::Mutex<VecDeque<StoreEvent>>,
    capacity: usize,
}

impl StoreEventLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Remove and return stored events, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.events.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StoreObserver for StoreEventLog {
    fn on_event(&self, event: &StoreEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Monotonic operation counters for one store.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    saves: AtomicU64,
    loads: AtomicU64,
    backup_recoveries: AtomicU64,
    default_fallbacks: AtomicU64,
    lock_contentions: AtomicU64,
}

/// Point-in-time copy of [`StoreMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreMetricsSnapshot {
    pub saves: u64,
    pub loads: u64,
    pub backup_recoveries: u64,
    pub default_fallbacks: u64,
    pub lock_contentions: u64,
}

impl StoreMetrics {
    pub(crate) fn record(&self, event: &StoreEvent) {
        let counter = match event {
            StoreEvent::TableSaved { .. } => &self.saves,
            StoreEvent::TableLoaded { .. } => &self.loads,
            StoreEvent::BackupRecovered { .. } => &self.backup_recoveries,
            StoreEvent::DefaultFallback { .. } => &self.default_fallbacks,
            StoreEvent::LockContended { .. } => &self.lock_contentions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            saves: self.saves.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            backup_recoveries: self.backup_recoveries.load(Ordering::Relaxed),
            default_fallbacks: self.default_fallbacks.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
        }
    }
}
