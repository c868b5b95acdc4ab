//! # Ebb Engine
//!
//! The offline synchronization and conflict-resolution engine for Ebb
//! mobile clients.
//!
//! A client keeps working while disconnected from its backend: local
//! mutations are captured as [`PendingAction`]s in a durable queue, and once
//! connectivity returns the engine replays them against the remote service,
//! reconciling each locally-modified record with whatever the remote holds
//! now.
//!
//! ## Design Principles
//!
//! - **Collaborators behind traits**: the remote service ([`RemoteService`])
//!   and the durable key-value store ([`StateStore`]) are supplied by the
//!   host; the engine owns only the queueing, retry, and merge logic.
//! - **Sequential cycles**: one sync cycle at a time, actions applied in
//!   (priority, age) order. A cycle is never re-entrant and never cancelled
//!   mid-flight.
//! - **Bounded retries, no silent loss**: an action that exhausts its retry
//!   budget is demoted to low priority and retained for inspection, never
//!   dropped.
//! - **Explicit context**: everything lives in a [`SyncQueue`] owned by the
//!   application; no global statics, so multiple instances coexist under
//!   test or per tenant.
//!
//! ## Core Concepts
//!
//! ### Pending Actions
//!
//! A queued mutation: `Create`, `Update`, `Delete`, or `Query`, tagged with
//! an entity type (`"collection"`, `"order"`, `"impact"`, ...), a JSON
//! payload snapshot, a priority, and retry bookkeeping.
//!
//! ### Conflicts
//!
//! When an `Update` meets a concurrently-modified (or deleted) remote
//! record, a [`ConflictRecord`] is built and handed to the
//! [`ConflictResolver`], which applies a [`ResolutionStrategy`] — from plain
//! last-writer-wins up to the entity-aware smart merge.
//!
//! ### Triggers
//!
//! The [`Scheduler`] turns external signals (connectivity changes, app
//! foregrounding, a periodic timer, fresh enqueues) into sync cycles,
//! coalescing anything that arrives while a cycle is already running.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ebb_engine::{
//!     ActionKind, EngineConfig, MemoryStore, NewAction, RemoteRecord,
//!     RemoteService, SyncQueue, SyncTrigger,
//! };
//! use serde_json::json;
//!
//! # struct NullRemote;
//! # #[async_trait::async_trait]
//! # impl RemoteService for NullRemote {
//! #     async fn get(&self, entity_type: &str, id: &str) -> ebb_engine::Result<RemoteRecord> {
//! #         Err(ebb_engine::SyncError::RemoteNotFound {
//! #             entity_type: entity_type.into(),
//! #             id: id.into(),
//! #         })
//! #     }
//! #     async fn create(&self, _: &str, _: Option<&str>, _: &serde_json::Value) -> ebb_engine::Result<()> { Ok(()) }
//! #     async fn update(&self, _: &str, _: &str, _: &serde_json::Value) -> ebb_engine::Result<()> { Ok(()) }
//! #     async fn delete(&self, _: &str, _: &str) -> ebb_engine::Result<()> { Ok(()) }
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = Arc::new(
//!     SyncQueue::load(
//!         EngineConfig::default(),
//!         Arc::new(NullRemote),
//!         Arc::new(MemoryStore::new()),
//!     )
//!     .await,
//! );
//!
//! // Capture a mutation while offline.
//! let id = queue
//!     .enqueue(NewAction::new(
//!         ActionKind::Create,
//!         "collection",
//!         json!({"items": []}),
//!     ))
//!     .await;
//! assert_eq!(queue.pending_actions().await.len(), 1);
//!
//! // Back online: replay the queue.
//! queue.set_connected(true);
//! let outcome = queue.run_sync(SyncTrigger::Manual).await;
//! # let _ = (id, outcome);
//! # }
//! ```

pub mod action;
pub mod config;
pub mod conflict;
pub mod error;
pub mod merge;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod stats;
pub mod store;

// Re-export main types at crate root
pub use action::{ActionKind, NewAction, PendingAction, Priority};
pub use config::EngineConfig;
pub use conflict::{
    ConflictKind, ConflictRecord, ConflictResolver, ResolutionOutcome, ResolutionStrategy,
};
pub use error::{Result, SyncError};
pub use queue::{SkipReason, SyncOutcome, SyncQueue, SyncReport, SyncStatus};
pub use remote::{RemoteRecord, RemoteService};
pub use scheduler::{Scheduler, SchedulerHandle, SyncSignal, SyncTrigger};
pub use stats::SyncStats;
pub use store::{MemoryStore, StateStore, QUEUE_KEY, STATS_KEY};

/// Type aliases for clarity
pub type ActionId = String;
pub type EntityType = String;
pub type EntityId = String;
pub type Timestamp = u64;
