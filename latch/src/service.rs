//! Persistence service: lifecycle, asynchronous stores, point queries.
//!
//! The service is the host-facing surface over the record table and the
//! value codec. It has exactly two states:
//!
//! - **Inactive** — the initial state. Every operation is a no-op (`store`)
//!   or returns empty (`query`, `item_info`). Activation failures leave the
//!   service here; nothing propagates to the host.
//! - **Active** — entered only after the directory tree exists, the table
//!   opened, and the writer thread spawned.
//!
//! # Write path
//!
//! `store` never touches the disk on the caller's thread: it builds the
//! value, timestamps it, and hands encode+put to a single writer thread
//! through an unbounded queue. One worker gives a total order over all
//! accepted stores, which is what preserves the invariant that matters —
//! stores for the *same* key apply in submission order, so the last
//! submitted value wins. Stores for different keys carry no ordering
//! guarantee relative to each other, and a query racing an in-flight store
//! may observe either the old or the new value. Write failures happen after
//! the caller has returned and surface only in the logs.
//!
//! `deactivate` closes the queue and joins the worker, so every accepted
//! store is applied (drained) before the table is synced and released.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, Utc};

use crate::error::{LatchError, Result, TableError};
use crate::layout::StorageLayout;
use crate::record::{self, StoredValue};
use crate::state::State;
use crate::table::RecordTable;

/// Constant service identifier, as reported by [`PersistenceService::id`].
const SERVICE_ID: &str = "latch";

/// Constant display label; the service carries a single label for every
/// locale.
const SERVICE_LABEL: &str = "Latch";

/// Default expected entry count for a newly created table.
const DEFAULT_EXPECTED_ENTRIES: u64 = 10_000;

/// Default average key size in bytes for a newly created table.
const DEFAULT_AVERAGE_KEY_SIZE: u32 = 15;

/// Static configuration for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root under which `persistence/<service_id>/` is created.
    pub data_root: PathBuf,
    /// Expected number of distinct items; sizes a newly created table.
    pub expected_entries: u64,
    /// Average key length in bytes; sizes the slots of a new table.
    pub average_key_size: u32,
}

impl ServiceConfig {
    /// Configuration rooted at `data_root` with default capacity.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            expected_entries: DEFAULT_EXPECTED_ENTRIES,
            average_key_size: DEFAULT_AVERAGE_KEY_SIZE,
        }
    }
}

/// Lookup criteria for [`PersistenceService::query`].
///
/// Only the item name participates in the lookup. The optional bounds exist
/// for interface compatibility with callers that build time-range queries;
/// they are ignored by design, because only the latest value per item
/// exists.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    /// Name of the item to look up.
    pub item_name: String,
    /// Ignored: the store keeps no history before the latest value.
    pub begin: Option<DateTime<Utc>>,
    /// Ignored: the store keeps no history before the latest value.
    pub end: Option<DateTime<Utc>>,
}

impl FilterCriteria {
    /// Criteria matching a single item by name.
    pub fn item(name: impl Into<String>) -> Self {
        Self {
            item_name: name.into(),
            begin: None,
            end: None,
        }
    }
}

/// Read-only point-in-time view of a persisted value, returned by queries.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricItem {
    /// Item name (the effective storage key).
    pub name: String,
    /// The persisted state.
    pub state: State,
    /// When the value was captured.
    pub timestamp: DateTime<Utc>,
}

impl From<StoredValue> for HistoricItem {
    fn from(value: StoredValue) -> Self {
        Self {
            name: value.name,
            state: value.state,
            timestamp: value.timestamp,
        }
    }
}

/// Consumer-facing descriptor of one persisted item.
///
/// The estimated count is always 1: the store keeps exactly the latest
/// value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemInfo {
    /// Item name.
    pub name: String,
    /// Estimated number of stored records for this item.
    pub count: u64,
}

/// Trigger policy advertised to an external scheduler.
///
/// The service does not schedule anything itself; it only recommends when
/// the embedding platform should call [`PersistenceService::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Persist an item whenever its value changes.
    OnChange,
    /// Restore the last persisted value when the platform starts.
    RestoreOnStartup,
}

/// Unit of work for the writer thread.
enum Job {
    Store { key: String, value: StoredValue },
    Flush(mpsc::SyncSender<()>),
}

/// Resources held while the service is active.
struct Active {
    table: Arc<RecordTable>,
    sender: mpsc::Sender<Job>,
    worker: thread::JoinHandle<()>,
}

/// The last-value persistence service.
///
/// See the [module docs](self) for the state machine and write-path
/// semantics.
pub struct PersistenceService {
    config: ServiceConfig,
    active: Option<Active>,
}

impl PersistenceService {
    /// Creates the service in the Inactive state.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Constant service identifier.
    pub fn id(&self) -> &'static str {
        SERVICE_ID
    }

    /// Constant display label. `locale` is accepted for interface
    /// compatibility and ignored — there is a single label.
    pub fn label(&self, locale: Option<&str>) -> &'static str {
        let _ = locale;
        SERVICE_LABEL
    }

    /// Whether the service is currently Active.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Runs the full activation sequence: ensure the directory tree, open
    /// (or repair) the table, spawn the writer.
    ///
    /// Activation failure is non-fatal to the host: the cause is logged at
    /// `warn` and the service stays Inactive. Calling `activate` on an
    /// already Active service is a no-op.
    pub fn activate(&mut self) {
        if self.active.is_some() {
            return;
        }
        tracing::debug!("latch persistence service is being activated");

        let layout = StorageLayout::new(&self.config.data_root, SERVICE_ID);
        if let Err(e) = layout.ensure() {
            tracing::warn!("failed to create storage directories: {e}");
            tracing::warn!("latch persistence service activation has failed");
            return;
        }

        let table = match self.open_or_repair(&layout) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                tracing::warn!("failed to open the record table: {e}");
                tracing::warn!("latch persistence service activation has failed");
                return;
            }
        };

        let (sender, receiver) = mpsc::channel();
        let worker = {
            let table = Arc::clone(&table);
            thread::Builder::new()
                .name("latch-writer".to_string())
                .spawn(move || write_loop(&receiver, &table))
        };

        match worker {
            Ok(worker) => {
                self.active = Some(Active {
                    table,
                    sender,
                    worker,
                });
                tracing::debug!("latch persistence service is now activated");
            }
            Err(e) => {
                tracing::warn!("failed to spawn the writer thread: {e}");
                tracing::warn!("latch persistence service activation has failed");
            }
        }
    }

    /// Opens the table; on structural corruption, quarantines the bad file
    /// into the backup directory and creates a fresh one.
    fn open_or_repair(&self, layout: &StorageLayout) -> Result<RecordTable> {
        let table_file = layout.table_file();
        match RecordTable::open(
            &table_file,
            self.config.expected_entries,
            self.config.average_key_size,
        ) {
            Err(LatchError::Table(TableError::Corrupted { reason, .. })) => {
                tracing::warn!("record table is corrupt: {reason}");
                let quarantined = layout.quarantine(&table_file)?;
                tracing::warn!(
                    "corrupt table quarantined to '{}'; starting with an empty table",
                    quarantined.display()
                );
                RecordTable::open(
                    &table_file,
                    self.config.expected_entries,
                    self.config.average_key_size,
                )
            }
            other => other,
        }
    }

    /// Releases all resources and enters the Inactive state.
    ///
    /// The write queue is closed and drained — the worker applies every
    /// accepted store before exiting — then the table is synced and the
    /// mapping released. Idempotent; a later [`PersistenceService::activate`]
    /// re-runs the full open sequence.
    pub fn deactivate(&mut self) {
        let Some(Active {
            table,
            sender,
            worker,
        }) = self.active.take()
        else {
            return;
        };

        // Closing the channel lets the worker drain and exit.
        drop(sender);
        if worker.join().is_err() {
            tracing::warn!("writer thread panicked during shutdown");
        }

        if let Err(e) = table.sync() {
            tracing::warn!("failed to sync the record table during shutdown: {e}");
        }
        tracing::debug!("latch persistence service deactivated");
        // `table` drops here; the service and the worker held the only
        // handles, so the mapping is released exactly once.
    }

    /// Persists the latest value for an item, asynchronously.
    ///
    /// The effective key is `alias` when given, else `name`; the value is
    /// timestamped with the current time and queued for the writer — the
    /// call returns without waiting for disk I/O.
    ///
    /// No-ops: an Inactive service, and an [`State::Undefined`] state.
    /// Undefined means "no reading yet" and would only pollute the
    /// last-value cache with meaningless records.
    pub fn store(&self, name: &str, state: State, alias: Option<&str>) {
        let Some(active) = &self.active else {
            tracing::debug!("store for '{name}' ignored: service is inactive");
            return;
        };
        if state.is_undefined() {
            return;
        }

        let key = alias.unwrap_or(name).to_string();
        tracing::debug!("store called for {key}");

        let value = StoredValue::now(key.clone(), state);
        if active.sender.send(Job::Store { key, value }).is_err() {
            tracing::warn!("writer is gone; dropping store for '{name}'");
        }
    }

    /// Looks up the latest value for the item named by `criteria`.
    ///
    /// Returns at most one element: empty when the service is Inactive, the
    /// key is absent, or the stored record fails to decode. Any range
    /// bounds in the criteria are ignored by design — only the latest value
    /// exists.
    pub fn query(&self, criteria: &FilterCriteria) -> Vec<HistoricItem> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        let Some(text) = active.table.get(&criteria.item_name) else {
            return Vec::new();
        };
        match record::decode(&text) {
            Some(value) => vec![HistoricItem::from(value)],
            None => Vec::new(),
        }
    }

    /// Summarizes every persisted item as a `(name, count = 1)` descriptor.
    ///
    /// Records that fail to decode are dropped from the summary; they never
    /// abort the enumeration.
    pub fn item_info(&self) -> BTreeSet<ItemInfo> {
        let Some(active) = &self.active else {
            return BTreeSet::new();
        };
        active
            .table
            .values()
            .filter_map(|text| record::decode(&text))
            .map(|value| ItemInfo {
                name: value.name,
                count: 1,
            })
            .collect()
    }

    /// Trigger policy recommended to the external scheduler: restore the
    /// last value at startup, and persist on every change.
    pub fn default_strategies(&self) -> Vec<Strategy> {
        vec![Strategy::RestoreOnStartup, Strategy::OnChange]
    }

    /// Blocks until every store submitted before this call has been applied.
    ///
    /// An explicit barrier through the writer queue, for embedders (and
    /// tests) that need read-after-write at a known point. No-op when
    /// Inactive.
    pub fn flush(&self) {
        let Some(active) = &self.active else {
            return;
        };
        let (done_tx, done_rx) = mpsc::sync_channel(0);
        if active.sender.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for PersistenceService {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for PersistenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceService")
            .field("config", &self.config)
            .field("active", &self.active.is_some())
            .finish()
    }
}

/// Writer loop: applies queued stores until the channel closes.
///
/// Failures here happen after the original caller has returned, so they are
/// logged and swallowed — the accepted fire-and-forget limitation of the
/// asynchronous write path.
fn write_loop(receiver: &mpsc::Receiver<Job>, table: &RecordTable) {
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Store { key, value } => match record::encode(&value) {
                Ok(text) => match table.put(&key, &text) {
                    Ok(()) => {
                        tracing::debug!("stored '{key}' with state '{}' as '{text}'", value.state);
                    }
                    Err(e) => tracing::warn!("failed to store '{key}': {e}"),
                },
                Err(e) => tracing::warn!("failed to encode value for '{key}': {e}"),
            },
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let service = PersistenceService::new(ServiceConfig::new("/tmp/unused"));
        assert_eq!(service.id(), "latch");
        assert_eq!(service.label(None), "Latch");
        assert_eq!(service.label(Some("de-DE")), "Latch");
    }

    #[test]
    fn test_default_strategies() {
        let service = PersistenceService::new(ServiceConfig::new("/tmp/unused"));
        assert_eq!(
            service.default_strategies(),
            vec![Strategy::RestoreOnStartup, Strategy::OnChange]
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = ServiceConfig::new("/data");
        assert_eq!(config.expected_entries, 10_000);
        assert_eq!(config.average_key_size, 15);
    }

    #[test]
    fn test_inactive_operations_are_noops() {
        let service = PersistenceService::new(ServiceConfig::new("/tmp/unused"));
        assert!(!service.is_active());

        // None of these may panic or touch the filesystem.
        service.store("temp.Kitchen", State::Number(21.5), None);
        service.flush();
        assert!(service.query(&FilterCriteria::item("temp.Kitchen")).is_empty());
        assert!(service.item_info().is_empty());
    }

    #[test]
    fn test_deactivate_without_activate() {
        let mut service = PersistenceService::new(ServiceConfig::new("/tmp/unused"));
        service.deactivate();
        service.deactivate();
        assert!(!service.is_active());
    }

    #[test]
    fn test_filter_criteria_builder() {
        let criteria = FilterCriteria::item("door.Front");
        assert_eq!(criteria.item_name, "door.Front");
        assert!(criteria.begin.is_none());
        assert!(criteria.end.is_none());
    }
}
