//! Durable per-group snapshot for late joiners.
//!
//! ```text
//!  gesture end ──► PersistenceAdapter::schedule_save()
//!                      │  (500ms debounce, restarts on every call)
//!                      ▼
//!                  SnapshotStore::write_snapshot()   (blocking thread)
//!
//!  start() ──► PersistenceAdapter::bootstrap() ──► SnapshotStore::read_snapshot()
//! ```
//!
//! One row per group. The store stamps `updated_at` with its own clock and
//! the last write to land wins; nothing reconciles writer clocks.
//!
//! Store failures never reach the live sync path: the adapter logs them
//! and the next debounce cycle simply tries again.

use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, Options, SingleThreaded, WriteOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;

use crate::camera::CameraState;
use crate::error::StoreError;
use crate::protocol::now_millis;
use crate::task::{cancel_slot, ScheduledTask};

/// The stored view of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub group_id: String,
    pub camera: CameraState,
    pub writer_instance_id: String,
    /// Store clock, epoch millis. Set by the store on write.
    pub updated_at: u64,
}

impl PersistedSnapshot {
    pub fn new(group_id: impl Into<String>, camera: CameraState, writer: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            camera,
            writer_instance_id: writer.into(),
            updated_at: 0,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

/// Store timestamp for a new write: wall clock, but never behind the
/// previous write for the same group.
fn stamp(previous: Option<u64>) -> u64 {
    let now = now_millis();
    match previous {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

/// Durable store collaborator.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` for a group that was never written.
    fn read_snapshot(&self, group_id: &str) -> Result<Option<PersistedSnapshot>, StoreError>;

    /// Replace the group's row. The store assigns `updated_at`.
    fn write_snapshot(&self, group_id: &str, snapshot: &PersistedSnapshot) -> Result<(), StoreError>;
}

// ─── In-memory store ─────────────────────────────────────────────────

/// Process-local store, used by tests and the demo.
#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: RwLock<HashMap<String, PersistedSnapshot>>,
    writes: AtomicU64,
    failing: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate an outage: every call errors until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database("store unavailable".into()));
        }
        Ok(())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read_snapshot(&self, group_id: &str) -> Result<Option<PersistedSnapshot>, StoreError> {
        self.check_available()?;
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        Ok(rows.get(group_id).cloned())
    }

    fn write_snapshot(&self, group_id: &str, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        let updated_at = stamp(rows.get(group_id).map(|s| s.updated_at));
        rows.insert(
            group_id.to_string(),
            PersistedSnapshot {
                group_id: group_id.to_string(),
                updated_at,
                ..snapshot.clone()
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── RocksDB store ───────────────────────────────────────────────────

const CF_SNAPSHOTS: &str = "snapshots";

/// RocksDB store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// fsync on every write
    pub sync_writes: bool,
    /// Max open files for RocksDB
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("viewsync_data"),
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_writes: false,
            max_open_files: 16,
        }
    }
}

/// RocksDB-backed snapshot store. Rows are JSON keyed by group id in
/// the `snapshots` column family.
pub struct RocksSnapshotStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-stamp-write so stamps stay monotonic per group.
    write_lock: Mutex<()>,
}

impl RocksSnapshotStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(2);

        let mut cf_opts = Options::default();
        cf_opts.optimize_for_point_lookup(8);
        let cfs = vec![ColumnFamilyDescriptor::new(CF_SNAPSHOTS, cf_opts)];

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(&db_opts, &config.path, cfs)?;
        log::info!("Opened snapshot store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_SNAPSHOTS)
            .ok_or_else(|| StoreError::Database(format!("missing column family {CF_SNAPSHOTS}")))
    }

    /// All group ids with a stored snapshot.
    pub fn list_groups(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf()?;
        let mut groups = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            groups.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(groups)
    }

    pub fn delete_snapshot(&self, group_id: &str) -> Result<(), StoreError> {
        let cf = self.cf()?;
        self.db.delete_cf(cf, group_id.as_bytes())?;
        Ok(())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.config.path
    }
}

impl SnapshotStore for RocksSnapshotStore {
    fn read_snapshot(&self, group_id: &str) -> Result<Option<PersistedSnapshot>, StoreError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, group_id.as_bytes())? {
            Some(bytes) => Ok(Some(PersistedSnapshot::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_snapshot(&self, group_id: &str, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let previous = self.read_snapshot(group_id)?.map(|s| s.updated_at);
        let row = PersistedSnapshot {
            group_id: group_id.to_string(),
            updated_at: stamp(previous),
            ..snapshot.clone()
        };

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        let cf = self.cf()?;
        self.db.put_cf_opt(cf, group_id.as_bytes(), row.encode()?, &write_opts)?;
        Ok(())
    }
}

// ─── Debounced adapter ───────────────────────────────────────────────

/// Debounced, failure-tolerant front for a [`SnapshotStore`].
pub struct PersistenceAdapter {
    store: Arc<dyn SnapshotStore>,
    debounce: Duration,
    pending: Mutex<Option<ScheduledTask>>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn SnapshotStore>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            pending: Mutex::new(None),
        }
    }

    /// One read at startup. Errors are logged and read as "no snapshot".
    pub async fn bootstrap(&self, group_id: &str) -> Option<PersistedSnapshot> {
        let store = self.store.clone();
        let group = group_id.to_string();
        let result = tokio::task::spawn_blocking(move || store.read_snapshot(&group))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Snapshot bootstrap for group {group_id} failed: {e}");
                None
            }
        }
    }

    /// Write `snapshot` once things have been quiet for the debounce period.
    /// A newer call replaces a pending one.
    pub fn schedule_save(&self, runtime: &Handle, snapshot: PersistedSnapshot) {
        let store = self.store.clone();
        let delay = self.debounce;

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        cancel_slot(&mut pending);
        *pending = Some(ScheduledTask::spawn(runtime, async move {
            tokio::time::sleep(delay).await;
            let group = snapshot.group_id.clone();
            let result = tokio::task::spawn_blocking(move || {
                store.write_snapshot(&snapshot.group_id, &snapshot)
            })
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|r| r);

            match result {
                Ok(()) => log::debug!("Persisted snapshot for group {group}"),
                Err(e) => log::warn!("Snapshot write for group {group} failed: {e}"),
            }
        }));
    }

    /// Drop any pending write.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        cancel_slot(&mut pending);
    }

    pub fn has_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }
}
