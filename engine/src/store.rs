//! Durable persistence for the queue and statistics.
//!
//! The host supplies a [`StateStore`] — any key-value layer with
//! get/set/remove semantics (platform preferences, a file, SQLite, ...).
//! The queue is persisted under a fixed key inside a versioned envelope so
//! the queued-action schema can evolve without breaking older snapshots;
//! anything unreadable degrades to an empty queue with a logged warning.
//! Data loss is logged, never fatal.

use crate::{error::Result, stats::SyncStats, PendingAction, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Durable store key for the serialized action queue.
pub const QUEUE_KEY: &str = "ebb.sync.queue";

/// Durable store key for the serialized sync statistics.
pub const STATS_KEY: &str = "ebb.sync.stats";

/// Version of the persisted queue envelope for forward compatibility.
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// A durable key-value persistence layer.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value, `None` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Versioned envelope around the persisted action queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQueue {
    format_version: u32,
    actions: Vec<PendingAction>,
}

/// Load the persisted queue, degrading to empty on any unreadable state.
pub async fn load_queue(store: &dyn StateStore) -> Vec<PendingAction> {
    let raw = match store.get(QUEUE_KEY).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            tracing::warn!(%err, "failed to read persisted queue, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<PersistedQueue>(&raw) {
        Ok(persisted) if persisted.format_version <= QUEUE_FORMAT_VERSION => persisted.actions,
        Ok(persisted) => {
            tracing::warn!(
                format_version = persisted.format_version,
                "persisted queue has an unsupported format version, starting empty"
            );
            Vec::new()
        }
        Err(err) => {
            tracing::warn!(%err, "persisted queue is corrupt, starting empty");
            Vec::new()
        }
    }
}

/// Persist the queue snapshot, overwriting any previous state.
pub async fn save_queue(store: &dyn StateStore, actions: &[PendingAction]) -> Result<()> {
    let persisted = PersistedQueue {
        format_version: QUEUE_FORMAT_VERSION,
        actions: actions.to_vec(),
    };
    let raw =
        serde_json::to_string(&persisted).map_err(|err| SyncError::Persistence(err.to_string()))?;
    store.set(QUEUE_KEY, &raw).await
}

/// Load persisted statistics, degrading to fresh counters.
pub async fn load_stats(store: &dyn StateStore) -> SyncStats {
    let raw = match store.get(STATS_KEY).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return SyncStats::default(),
        Err(err) => {
            tracing::warn!(%err, "failed to read persisted stats, starting fresh");
            return SyncStats::default();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|err| {
        tracing::warn!(%err, "persisted stats are corrupt, starting fresh");
        SyncStats::default()
    })
}

/// Persist the statistics snapshot.
pub async fn save_stats(store: &dyn StateStore, stats: &SyncStats) -> Result<()> {
    let raw =
        serde_json::to_string(stats).map_err(|err| SyncError::Persistence(err.to_string()))?;
    store.set(STATS_KEY, &raw).await
}

/// In-process [`StateStore`], used in tests and as a default before the
/// host wires platform storage. Write failures can be injected to exercise
/// persistence-error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw contents of a key, for assertions.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .map(|entries| entries.get(key).cloned())
            .unwrap_or_default()
    }

    /// Seed a key directly, bypassing the failure switch.
    pub fn seed(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| SyncError::Persistence("store lock poisoned".into()))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.entries
            .lock()
            .map_err(|_| SyncError::Persistence("store lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.entries
            .lock()
            .map_err(|_| SyncError::Persistence("store lock poisoned".into()))?
            .remove(key);
        Ok(())
    }
}
