//! The sync queue manager: owns the in-memory queue, persists it, orders
//! it, and drives retries.
//!
//! One cycle at a time: mutual exclusion is an atomic in-progress flag, so
//! a trigger that arrives mid-cycle observes `Syncing` and is answered with
//! [`SyncOutcome::Skipped`] rather than queued. Within a cycle, a snapshot
//! of the current queue is processed strictly sequentially in
//! (priority, age) order; actions enqueued during the cycle wait for the
//! next trigger.

use crate::{
    action::{now_millis, NewAction, PendingAction},
    conflict::{ConflictRecord, ConflictResolver, ResolutionOutcome},
    config::EngineConfig,
    error::Result,
    remote::RemoteService,
    scheduler::{SyncSignal, SyncTrigger},
    stats::SyncStats,
    store::{self, StateStore},
    ActionId, ActionKind, SyncError,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, watch, Mutex};

/// Whether a sync cycle is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
}

/// Why a sync request was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The client is offline
    Offline,
    /// A cycle is already in progress; the request was coalesced
    AlreadySyncing,
}

/// Per-cycle tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Actions taken from the queue snapshot
    pub processed: u32,
    /// Actions applied to the remote and removed
    pub succeeded: u32,
    /// Actions that failed this attempt and stay queued
    pub failed: u32,
    /// The last per-action error observed, if any
    pub last_error: Option<String>,
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle ran to completion (individual actions may still have
    /// failed; see the report)
    Completed(SyncReport),
    /// Nothing ran
    Skipped(SkipReason),
    /// The cycle ran but the resulting state could not be persisted; the
    /// in-memory queue is retained
    Failed { error: String },
}

/// The engine context: queue, resolver, statistics, and collaborator
/// handles, owned by the application.
pub struct SyncQueue {
    config: EngineConfig,
    remote: Arc<dyn RemoteService>,
    store: Arc<dyn StateStore>,
    resolver: ConflictResolver,
    actions: Mutex<Vec<PendingAction>>,
    stats: Mutex<SyncStats>,
    connected: AtomicBool,
    in_progress: AtomicBool,
    status_tx: watch::Sender<SyncStatus>,
    signal_tx: StdMutex<Option<mpsc::UnboundedSender<SyncSignal>>>,
}

impl SyncQueue {
    /// Build a queue manager, hydrating queue and statistics from the
    /// durable store. Unreadable state degrades to empty (logged by the
    /// persistence layer). The client starts out considered offline.
    pub async fn load(
        config: EngineConfig,
        remote: Arc<dyn RemoteService>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let mut actions = store::load_queue(store.as_ref()).await;
        actions.sort_by_key(PendingAction::sort_key);
        let stats = store::load_stats(store.as_ref()).await;

        tracing::info!(
            pending = actions.len(),
            cycles_run = stats.cycles_run,
            "sync queue loaded"
        );

        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        let resolver = ConflictResolver::new(config.default_strategy);

        Self {
            config,
            remote,
            store,
            resolver,
            actions: Mutex::new(actions),
            stats: Mutex::new(stats),
            connected: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            status_tx,
            signal_tx: StdMutex::new(None),
        }
    }

    /// Queue a mutation.
    ///
    /// Assigns the id and enqueue timestamp, inserts in sorted position,
    /// persists the queue (a persistence failure is logged and non-fatal),
    /// and — when connected and not mid-sync — asks the scheduler to
    /// trigger a cycle.
    pub async fn enqueue(&self, new: NewAction) -> ActionId {
        let action = PendingAction::from_new(new, self.config.default_max_retries, now_millis());
        let id = action.id.clone();

        let snapshot = {
            let mut actions = self.actions.lock().await;
            insert_sorted(&mut actions, action);
            actions.clone()
        };

        if let Err(err) = store::save_queue(self.store.as_ref(), &snapshot).await {
            tracing::error!(%err, action_id = %id, "failed to persist queue after enqueue");
        }

        if self.is_connected() && !self.in_progress.load(Ordering::SeqCst) {
            self.send_signal(SyncSignal::ActionEnqueued);
        }

        tracing::debug!(action_id = %id, pending = snapshot.len(), "action enqueued");
        id
    }

    /// Run one sync cycle.
    ///
    /// Returns [`SyncOutcome::Skipped`] when offline or when a cycle is
    /// already in progress. Individual action failures never abort the
    /// batch; only a persistence failure makes the cycle itself fail.
    pub async fn run_sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        if !self.is_connected() {
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SyncOutcome::Skipped(SkipReason::AlreadySyncing);
        }

        let _ = self.status_tx.send(SyncStatus::Syncing);
        let outcome = self.sync_cycle(trigger).await;
        self.in_progress.store(false, Ordering::SeqCst);
        let _ = self.status_tx.send(SyncStatus::Idle);

        outcome
    }

    /// UI-initiated sync ("pull to refresh"). Same semantics as
    /// [`run_sync`](Self::run_sync) with a manual trigger.
    pub async fn trigger_sync(&self) -> SyncOutcome {
        self.run_sync(SyncTrigger::Manual).await
    }

    async fn sync_cycle(&self, trigger: SyncTrigger) -> SyncOutcome {
        let snapshot: Vec<PendingAction> = {
            let actions = self.actions.lock().await;
            actions
                .iter()
                .filter(|action| !action.is_exhausted())
                .cloned()
                .collect()
        };

        tracing::info!(?trigger, actions = snapshot.len(), "sync cycle started");

        let mut report = SyncReport::default();
        let mut completed: HashSet<ActionId> = HashSet::new();
        let mut failures: HashMap<ActionId, String> = HashMap::new();

        for action in &snapshot {
            report.processed += 1;
            match self.apply_action(action).await {
                Ok(()) => {
                    report.succeeded += 1;
                    completed.insert(action.id.clone());
                }
                Err(err) => {
                    report.failed += 1;
                    let message = err.to_string();
                    tracing::warn!(
                        action_id = %action.id,
                        entity_type = %action.entity_type,
                        kind = ?action.kind,
                        %message,
                        "action failed, will retry"
                    );
                    report.last_error = Some(message.clone());
                    failures.insert(action.id.clone(), message);
                }
            }
        }

        let queue_snapshot = {
            let mut actions = self.actions.lock().await;
            actions.retain(|action| !completed.contains(&action.id));
            for action in actions.iter_mut() {
                if let Some(message) = failures.get(&action.id) {
                    if action.record_failure(message) {
                        tracing::warn!(
                            action_id = %action.id,
                            entity_type = %action.entity_type,
                            "retry budget exhausted, action deprioritized and retained"
                        );
                    }
                }
            }
            actions.sort_by_key(PendingAction::sort_key);
            actions.clone()
        };

        let stats_snapshot = {
            let mut stats = self.stats.lock().await;
            stats.record_cycle(&report, now_millis());
            stats.clone()
        };

        let persisted = store::save_queue(self.store.as_ref(), &queue_snapshot).await;
        let persisted = match persisted {
            Ok(()) => store::save_stats(self.store.as_ref(), &stats_snapshot).await,
            Err(err) => Err(err),
        };
        if let Err(err) = persisted {
            tracing::error!(%err, "failed to persist sync state, in-memory queue retained");
            return SyncOutcome::Failed {
                error: err.to_string(),
            };
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = queue_snapshot.len(),
            "sync cycle finished"
        );
        SyncOutcome::Completed(report)
    }

    async fn apply_action(&self, action: &PendingAction) -> Result<()> {
        match action.kind {
            ActionKind::Create => {
                self.remote
                    .create(
                        &action.entity_type,
                        action.entity_id.as_deref(),
                        &action.payload,
                    )
                    .await
            }
            ActionKind::Update => self.apply_update(action).await,
            ActionKind::Delete => {
                let id = require_entity_id(action)?;
                match self.remote.delete(&action.entity_type, id).await {
                    // Already gone remotely: the delete is idempotent.
                    Ok(()) | Err(SyncError::RemoteNotFound { .. }) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            ActionKind::Query => {
                // A queued read is satisfied by reaching the remote once;
                // whether the entity still exists is an answer, not a
                // failure.
                let Some(id) = action.entity_id.as_deref() else {
                    return Ok(());
                };
                match self.remote.get(&action.entity_type, id).await {
                    Ok(_) | Err(SyncError::RemoteNotFound { .. }) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn apply_update(&self, action: &PendingAction) -> Result<()> {
        let id = require_entity_id(action)?;

        match self.remote.get(&action.entity_type, id).await {
            Ok(remote_record) => {
                let conflict = ConflictRecord::both_modified(
                    id,
                    action.payload.clone(),
                    action.enqueued_at,
                    remote_record.payload,
                    remote_record.updated_at,
                );
                let outcome = self.resolver.resolve(
                    &conflict,
                    &action.entity_type,
                    Some(self.config.update_strategy),
                );
                self.apply_resolution(action, id, outcome).await
            }
            Err(SyncError::RemoteNotFound { .. }) => {
                // The remote deleted the entity under our local edit. A 404
                // carries no deletion timestamp, so the remote side is 0.
                let conflict = ConflictRecord::remote_deleted_local_modified(
                    id,
                    action.payload.clone(),
                    action.enqueued_at,
                    0,
                );
                let outcome = self.resolver.resolve(
                    &conflict,
                    &action.entity_type,
                    Some(self.config.update_strategy),
                );
                if outcome.should_delete {
                    // The resolution accepts the remote deletion.
                    tracing::debug!(
                        entity_type = %action.entity_type,
                        entity_id = %id,
                        "remote deletion accepted, dropping local update"
                    );
                    return Ok(());
                }
                match outcome.resolved_value {
                    Some(value) => {
                        self.remote
                            .create(&action.entity_type, Some(id), &value)
                            .await
                    }
                    None => Ok(()),
                }
            }
            // Conflict-free API errors (5xx, non-404 4xx, transport): no
            // merge needed, just retry.
            Err(err) => Err(err),
        }
    }

    async fn apply_resolution(
        &self,
        action: &PendingAction,
        id: &str,
        outcome: ResolutionOutcome,
    ) -> Result<()> {
        if outcome.should_delete {
            return match self.remote.delete(&action.entity_type, id).await {
                Ok(()) | Err(SyncError::RemoteNotFound { .. }) => Ok(()),
                Err(err) => Err(err),
            };
        }
        match outcome.resolved_value {
            Some(value) => self.remote.update(&action.entity_type, id, &value).await,
            None => Ok(()),
        }
    }

    /// The configuration the queue was loaded with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Update the connectivity flag. Normally driven by the scheduler.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of all queued actions, exhausted ones included.
    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.actions.lock().await.clone()
    }

    /// Number of actions a sync cycle would currently attempt.
    pub async fn actionable_count(&self) -> usize {
        self.actions
            .lock()
            .await
            .iter()
            .filter(|action| !action.is_exhausted())
            .count()
    }

    /// Current statistics snapshot.
    pub async fn sync_stats(&self) -> SyncStats {
        self.stats.lock().await.clone()
    }

    /// Watch the engine's busy/idle status.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Register a merge function for an entity type.
    pub fn register_merge_fn<F>(&self, entity_type: impl Into<String>, merge_fn: F)
    where
        F: Fn(
                &serde_json::Value,
                &serde_json::Value,
            ) -> std::result::Result<serde_json::Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.resolver.register_merge_fn(entity_type, merge_fn);
    }

    /// Register the manual conflict-resolution callback.
    pub fn register_manual_resolver<F>(&self, resolver: F)
    where
        F: Fn(&ConflictRecord) -> ResolutionOutcome + Send + Sync + 'static,
    {
        self.resolver.register_manual_resolver(resolver);
    }

    /// Access the conflict resolver, e.g. to set per-kind defaults before
    /// the queue is shared.
    pub fn resolver_mut(&mut self) -> &mut ConflictResolver {
        &mut self.resolver
    }

    pub(crate) fn attach_signal_sender(&self, sender: mpsc::UnboundedSender<SyncSignal>) {
        if let Ok(mut signal_tx) = self.signal_tx.lock() {
            *signal_tx = Some(sender);
        }
    }

    fn send_signal(&self, signal: SyncSignal) {
        let Ok(signal_tx) = self.signal_tx.lock() else {
            return;
        };
        if let Some(sender) = signal_tx.as_ref() {
            let _ = sender.send(signal);
        }
    }
}

/// Insert keeping the queue sorted by (priority rank, enqueued_at).
fn insert_sorted(actions: &mut Vec<PendingAction>, action: PendingAction) {
    let at = actions.partition_point(|existing| existing.sort_key() <= action.sort_key());
    actions.insert(at, action);
}

fn require_entity_id(action: &PendingAction) -> Result<&str> {
    action
        .entity_id
        .as_deref()
        .ok_or_else(|| SyncError::MissingEntityId(action.id.clone()))
}
