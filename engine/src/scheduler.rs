//! The sync scheduler: turns platform events into sync triggers.
//!
//! The host forwards raw lifecycle signals (connectivity changes,
//! foreground/background transitions) through a [`SchedulerHandle`]; the
//! scheduler task edge-detects them, tracks a periodic timer, and asks the
//! queue manager to run. Triggers are fire-and-forget: a cycle already in
//! progress absorbs them, so bursts of signals never pile up cycles.

use crate::queue::{SyncOutcome, SyncQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

/// Why a sync cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity returned after being offline
    NetworkReconnection,
    /// The app came back to the foreground while online
    AppForeground,
    /// The periodic interval elapsed with work pending
    Periodic,
    /// Requested explicitly (an enqueue while online, or the host)
    Manual,
}

/// A raw platform event forwarded to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// The reachability layer reports online (`true`) or offline (`false`)
    ConnectivityChanged(bool),
    AppForegrounded,
    AppBackgrounded,
    /// A host-driven timer tick, for platforms that own the timer (e.g.
    /// background-fetch wakeups); equivalent to the built-in interval
    PeriodicTick,
    /// An action was enqueued while online
    ActionEnqueued,
}

/// Sends platform events into a running [`Scheduler`]. Cheap to clone;
/// sends never block.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    signal_tx: mpsc::UnboundedSender<SyncSignal>,
}

impl SchedulerHandle {
    pub fn connectivity_changed(&self, online: bool) {
        self.send(SyncSignal::ConnectivityChanged(online));
    }

    pub fn app_foregrounded(&self) {
        self.send(SyncSignal::AppForegrounded);
    }

    pub fn app_backgrounded(&self) {
        self.send(SyncSignal::AppBackgrounded);
    }

    pub fn periodic_tick(&self) {
        self.send(SyncSignal::PeriodicTick);
    }

    /// Ask for a sync outside any platform event.
    pub fn request_sync(&self) {
        self.send(SyncSignal::ActionEnqueued);
    }

    fn send(&self, signal: SyncSignal) {
        // A dropped scheduler just means signals go nowhere.
        let _ = self.signal_tx.send(signal);
    }
}

/// The event loop that owns trigger policy.
///
/// Policy: reconnection and foreground transitions are edge-triggered (a
/// repeated "online" report never re-triggers), the periodic timer only
/// fires when online with actionable work queued, and every trigger is a
/// plain `run_sync` call so coalescing falls out of the queue's mutual
/// exclusion.
pub struct Scheduler {
    queue: Arc<SyncQueue>,
    signal_rx: mpsc::UnboundedReceiver<SyncSignal>,
    foreground: bool,
}

impl Scheduler {
    /// Wire a scheduler to a queue manager.
    ///
    /// Also registers the signal sender with the queue so enqueues while
    /// online request a cycle on their own.
    pub fn new(queue: Arc<SyncQueue>) -> (Self, SchedulerHandle) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        queue.attach_signal_sender(signal_tx.clone());

        let scheduler = Self {
            queue,
            signal_rx,
            foreground: true,
        };
        (scheduler, SchedulerHandle { signal_tx })
    }

    /// Run until every [`SchedulerHandle`] is dropped. Spawn this on the
    /// runtime.
    pub async fn run(mut self) {
        let period = self.queue.config().periodic_interval;
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(period_secs = period.as_secs(), "sync scheduler started");

        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    match signal {
                        Some(signal) => self.handle_signal(signal).await,
                        None => break,
                    }
                }
                _ = interval.tick() => self.periodic(period).await,
            }
        }

        tracing::debug!("sync scheduler stopped");
    }

    async fn handle_signal(&mut self, signal: SyncSignal) {
        tracing::trace!(?signal, "scheduler signal");
        match signal {
            SyncSignal::ConnectivityChanged(true) => {
                let was_offline = !self.queue.is_connected();
                self.queue.set_connected(true);
                if was_offline {
                    self.trigger(SyncTrigger::NetworkReconnection).await;
                }
            }
            SyncSignal::ConnectivityChanged(false) => {
                self.queue.set_connected(false);
            }
            SyncSignal::AppForegrounded => {
                let was_background = !self.foreground;
                self.foreground = true;
                if was_background && self.queue.is_connected() {
                    self.trigger(SyncTrigger::AppForeground).await;
                }
            }
            SyncSignal::AppBackgrounded => {
                self.foreground = false;
            }
            SyncSignal::PeriodicTick => {
                self.periodic(self.queue.config().periodic_interval).await;
            }
            SyncSignal::ActionEnqueued => {
                if self.queue.is_connected() {
                    self.trigger(SyncTrigger::Manual).await;
                }
            }
        }
    }

    async fn periodic(&self, period: Duration) {
        if !self.queue.is_connected() {
            return;
        }
        // An empty queue makes the tick a no-op rather than a remote call.
        if self.queue.actionable_count().await == 0 {
            tracing::trace!(period_secs = period.as_secs(), "periodic tick, nothing queued");
            return;
        }
        self.trigger(SyncTrigger::Periodic).await;
    }

    async fn trigger(&self, trigger: SyncTrigger) {
        match self.queue.run_sync(trigger).await {
            SyncOutcome::Skipped(reason) => {
                tracing::debug!(?trigger, ?reason, "sync trigger skipped");
            }
            // Cycle outcomes are logged by the queue manager.
            SyncOutcome::Completed(_) | SyncOutcome::Failed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, NewAction};
    use crate::config::EngineConfig;
    use crate::error::Result;
    use crate::remote::{RemoteRecord, RemoteService};
    use crate::store::MemoryStore;
    use crate::SyncError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Remote that accepts every write and counts them.
    #[derive(Default)]
    struct CountingRemote {
        writes: AtomicUsize,
    }

    impl CountingRemote {
        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteService for CountingRemote {
        async fn get(&self, entity_type: &str, id: &str) -> Result<RemoteRecord> {
            Err(SyncError::RemoteNotFound {
                entity_type: entity_type.into(),
                id: id.into(),
            })
        }
        async fn create(&self, _: &str, _: Option<&str>, _: &Value) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn update(&self, _: &str, _: &str, _: &Value) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn delete(&self, _: &str, _: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn scheduled_queue(
        config: EngineConfig,
    ) -> (Arc<SyncQueue>, Arc<CountingRemote>, SchedulerHandle) {
        let remote = Arc::new(CountingRemote::default());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(SyncQueue::load(config, remote.clone(), store).await);

        let (scheduler, handle) = Scheduler::new(queue.clone());
        tokio::spawn(scheduler.run());

        (queue, remote, handle)
    }

    async fn settle() {
        // Paused-clock tests auto-advance through this sleep once the
        // scheduler task has quiesced.
        time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_drains_the_queue() {
        let (queue, remote, handle) = scheduled_queue(EngineConfig::default()).await;

        queue
            .enqueue(NewAction::new(ActionKind::Create, "order", json!({})))
            .await;
        settle().await;
        assert_eq!(remote.writes(), 0); // still offline

        handle.connectivity_changed(true);
        settle().await;

        assert_eq!(remote.writes(), 1);
        assert!(queue.pending_actions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_online_reports_do_not_retrigger() {
        let (queue, remote, handle) = scheduled_queue(EngineConfig::default()).await;

        handle.connectivity_changed(true);
        settle().await;

        // Park an action by enqueueing while the connectivity flag is off,
        // so no enqueue trigger fires.
        queue.set_connected(false);
        queue
            .enqueue(NewAction::new(ActionKind::Create, "order", json!({})))
            .await;
        queue.set_connected(true);

        // Already online: a duplicate report is not a reconnection edge.
        handle.connectivity_changed(true);
        settle().await;

        assert_eq!(remote.writes(), 0);
        assert_eq!(queue.pending_actions().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_while_online_syncs_without_explicit_trigger() {
        let (queue, remote, handle) = scheduled_queue(EngineConfig::default()).await;
        handle.connectivity_changed(true);
        settle().await;

        queue
            .enqueue(NewAction::new(ActionKind::Create, "collection", json!({})))
            .await;
        settle().await;

        assert_eq!(remote.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_transition_triggers_only_from_background() {
        let (queue, remote, handle) = scheduled_queue(EngineConfig::default()).await;
        handle.connectivity_changed(true);
        settle().await;

        queue.set_connected(false);
        queue
            .enqueue(NewAction::new(ActionKind::Create, "order", json!({})))
            .await;
        queue.set_connected(true);

        // Foregrounded while already foreground: no edge, no sync.
        handle.app_foregrounded();
        settle().await;
        assert_eq!(remote.writes(), 0);

        handle.app_backgrounded();
        handle.app_foregrounded();
        settle().await;

        assert_eq!(remote.writes(), 1);
        assert!(queue.pending_actions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_interval_syncs_pending_work() {
        let config = EngineConfig {
            periodic_interval: Duration::from_secs(60),
            ..EngineConfig::default()
        };
        let (queue, remote, handle) = scheduled_queue(config).await;
        handle.connectivity_changed(true);
        settle().await;

        // Park an action the enqueue trigger cannot drain (enqueue while
        // the scheduler thinks we are offline).
        queue.set_connected(false);
        queue
            .enqueue(NewAction::new(ActionKind::Create, "order", json!({})))
            .await;
        queue.set_connected(true);
        settle().await;
        assert_eq!(remote.writes(), 0);

        time::sleep(Duration::from_secs(61)).await;
        settle().await;

        assert_eq!(remote.writes(), 1);
        assert!(queue.pending_actions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_tick_with_empty_queue_stays_quiet() {
        let config = EngineConfig {
            periodic_interval: Duration::from_secs(60),
            ..EngineConfig::default()
        };
        let (_queue, remote, handle) = scheduled_queue(config).await;
        handle.connectivity_changed(true);

        time::sleep(Duration::from_secs(300)).await;
        settle().await;

        assert_eq!(remote.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn host_driven_tick_behaves_like_the_timer() {
        let (queue, remote, handle) = scheduled_queue(EngineConfig::default()).await;
        handle.connectivity_changed(true);
        settle().await;

        queue.set_connected(false);
        queue
            .enqueue(NewAction::new(ActionKind::Create, "order", json!({})))
            .await;
        queue.set_connected(true);

        handle.periodic_tick();
        settle().await;

        assert_eq!(remote.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn signals_while_offline_do_nothing() {
        let (queue, remote, handle) = scheduled_queue(EngineConfig::default()).await;

        queue
            .enqueue(NewAction::new(ActionKind::Create, "order", json!({})))
            .await;
        handle.app_backgrounded();
        handle.app_foregrounded();
        handle.periodic_tick();
        handle.request_sync();
        settle().await;

        assert_eq!(remote.writes(), 0);
        assert_eq!(queue.pending_actions().await.len(), 1);
    }
}
