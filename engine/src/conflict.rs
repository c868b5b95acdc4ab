//! Conflict detection types and the resolution dispatcher.
//!
//! A [`ConflictRecord`] captures one divergence between a locally-modified
//! value and its remote counterpart; the [`ConflictResolver`] maps it,
//! together with a [`ResolutionStrategy`], onto a [`ResolutionOutcome`].
//! Records and outcomes are ephemeral — constructed and consumed within a
//! single sync attempt.

use crate::{merge::smart_merge, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// How local and remote diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    BothModified,
    LocalDeletedRemoteModified,
    RemoteDeletedLocalModified,
    BothDeleted,
    ConcurrentCreation,
}

/// A detected conflict between a local and a remote value.
///
/// At least one of `local_value` / `remote_value` is present except for
/// [`ConflictKind::BothDeleted`]; the per-kind constructors uphold that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// How the divergence arose
    pub kind: ConflictKind,
    /// The entity both sides refer to
    pub id: EntityId,
    /// Local value, absent when locally deleted
    pub local_value: Option<serde_json::Value>,
    /// When the local side last changed (ms since epoch)
    pub local_timestamp: Timestamp,
    /// Remote value, absent when remotely deleted
    pub remote_value: Option<serde_json::Value>,
    /// When the remote side last changed; 0 when unknown (e.g. a 404 tells
    /// us nothing about when the deletion happened)
    pub remote_timestamp: Timestamp,
}

impl ConflictRecord {
    /// Both sides modified the entity since the last sync.
    pub fn both_modified(
        id: impl Into<EntityId>,
        local_value: serde_json::Value,
        local_timestamp: Timestamp,
        remote_value: serde_json::Value,
        remote_timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: ConflictKind::BothModified,
            id: id.into(),
            local_value: Some(local_value),
            local_timestamp,
            remote_value: Some(remote_value),
            remote_timestamp,
        }
    }

    /// The entity was deleted locally while the remote modified it.
    pub fn local_deleted_remote_modified(
        id: impl Into<EntityId>,
        local_timestamp: Timestamp,
        remote_value: serde_json::Value,
        remote_timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: ConflictKind::LocalDeletedRemoteModified,
            id: id.into(),
            local_value: None,
            local_timestamp,
            remote_value: Some(remote_value),
            remote_timestamp,
        }
    }

    /// The entity was modified locally while the remote deleted it.
    pub fn remote_deleted_local_modified(
        id: impl Into<EntityId>,
        local_value: serde_json::Value,
        local_timestamp: Timestamp,
        remote_timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: ConflictKind::RemoteDeletedLocalModified,
            id: id.into(),
            local_value: Some(local_value),
            local_timestamp,
            remote_value: None,
            remote_timestamp,
        }
    }

    /// Both sides deleted the entity.
    pub fn both_deleted(
        id: impl Into<EntityId>,
        local_timestamp: Timestamp,
        remote_timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: ConflictKind::BothDeleted,
            id: id.into(),
            local_value: None,
            local_timestamp,
            remote_value: None,
            remote_timestamp,
        }
    }

    /// Both sides independently created the entity.
    pub fn concurrent_creation(
        id: impl Into<EntityId>,
        local_value: serde_json::Value,
        local_timestamp: Timestamp,
        remote_value: serde_json::Value,
        remote_timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: ConflictKind::ConcurrentCreation,
            id: id.into(),
            local_value: Some(local_value),
            local_timestamp,
            remote_value: Some(remote_value),
            remote_timestamp,
        }
    }
}

/// The policy used to pick (or build) the winning value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionStrategy {
    /// The local value wins unconditionally
    LocalWins,
    /// The remote value wins unconditionally
    RemoteWins,
    /// Strictly-greater timestamp wins, ties favor remote (default)
    #[default]
    LatestWins,
    /// A registered per-entity-type merge function; falls back to
    /// `SmartMerge` when none is registered
    Merge,
    /// The structural, entity-aware merge ([`smart_merge`])
    SmartMerge,
    /// A registered manual-resolution callback; falls back to `LatestWins`
    /// when none is registered (never blocks)
    Manual,
}

/// What the resolver decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    /// The winning value; `None` when the entity should not survive
    pub resolved_value: Option<serde_json::Value>,
    /// Whether the entity ends up deleted
    pub should_delete: bool,
    /// The strategy actually applied, after any fallbacks
    pub strategy_used: ResolutionStrategy,
}

impl ResolutionOutcome {
    fn value(value: serde_json::Value, strategy_used: ResolutionStrategy) -> Self {
        Self {
            resolved_value: Some(value),
            should_delete: false,
            strategy_used,
        }
    }

    fn delete(strategy_used: ResolutionStrategy) -> Self {
        Self {
            resolved_value: None,
            should_delete: true,
            strategy_used,
        }
    }
}

/// A caller-registered merge function for one entity type. An `Err` falls
/// back to latest-wins.
pub type MergeFn = dyn Fn(&serde_json::Value, &serde_json::Value) -> Result<serde_json::Value, String>
    + Send
    + Sync;

/// A caller-registered manual resolution callback.
pub type ManualResolverFn = dyn Fn(&ConflictRecord) -> ResolutionOutcome + Send + Sync;

/// Maps conflicts onto resolutions.
///
/// An explicit context struct owned by the application — no global statics,
/// so per-tenant or per-test instances coexist. Registries sit behind
/// interior locks so registration works through a shared handle.
pub struct ConflictResolver {
    default_strategy: ResolutionStrategy,
    kind_defaults: HashMap<ConflictKind, ResolutionStrategy>,
    merge_fns: RwLock<HashMap<String, Box<MergeFn>>>,
    manual_resolver: RwLock<Option<Box<ManualResolverFn>>>,
}

impl ConflictResolver {
    /// A resolver with the given global default and no per-kind overrides.
    pub fn new(default_strategy: ResolutionStrategy) -> Self {
        Self {
            default_strategy,
            kind_defaults: HashMap::new(),
            merge_fns: RwLock::new(HashMap::new()),
            manual_resolver: RwLock::new(None),
        }
    }

    /// Set the default strategy for one conflict kind.
    pub fn set_kind_default(&mut self, kind: ConflictKind, strategy: ResolutionStrategy) {
        self.kind_defaults.insert(kind, strategy);
    }

    /// Register a merge function for an entity type, replacing any previous
    /// registration.
    pub fn register_merge_fn<F>(&self, entity_type: impl Into<String>, merge_fn: F)
    where
        F: Fn(&serde_json::Value, &serde_json::Value) -> Result<serde_json::Value, String>
            + Send
            + Sync
            + 'static,
    {
        if let Ok(mut merge_fns) = self.merge_fns.write() {
            merge_fns.insert(entity_type.into(), Box::new(merge_fn));
        }
    }

    /// Register the manual resolution callback.
    pub fn register_manual_resolver<F>(&self, resolver: F)
    where
        F: Fn(&ConflictRecord) -> ResolutionOutcome + Send + Sync + 'static,
    {
        if let Ok(mut manual) = self.manual_resolver.write() {
            *manual = Some(Box::new(resolver));
        }
    }

    /// Resolve a conflict.
    ///
    /// Strategy selection, in priority order: the explicit `override_strategy`,
    /// the per-kind default, the global default.
    pub fn resolve(
        &self,
        conflict: &ConflictRecord,
        entity_type: &str,
        override_strategy: Option<ResolutionStrategy>,
    ) -> ResolutionOutcome {
        let strategy = override_strategy
            .or_else(|| self.kind_defaults.get(&conflict.kind).copied())
            .unwrap_or(self.default_strategy);

        self.apply(strategy, conflict, entity_type)
    }

    fn apply(
        &self,
        strategy: ResolutionStrategy,
        conflict: &ConflictRecord,
        entity_type: &str,
    ) -> ResolutionOutcome {
        match strategy {
            ResolutionStrategy::LocalWins => match &conflict.local_value {
                Some(local) => {
                    ResolutionOutcome::value(local.clone(), ResolutionStrategy::LocalWins)
                }
                None => ResolutionOutcome::delete(ResolutionStrategy::LocalWins),
            },
            ResolutionStrategy::RemoteWins => match &conflict.remote_value {
                Some(remote) => {
                    ResolutionOutcome::value(remote.clone(), ResolutionStrategy::RemoteWins)
                }
                None => ResolutionOutcome::delete(ResolutionStrategy::RemoteWins),
            },
            ResolutionStrategy::LatestWins => latest_wins(conflict),
            ResolutionStrategy::Merge => self.apply_registered_merge(conflict, entity_type),
            ResolutionStrategy::SmartMerge => match (&conflict.local_value, &conflict.remote_value)
            {
                (Some(local), Some(remote)) => ResolutionOutcome::value(
                    smart_merge(
                        entity_type,
                        local,
                        conflict.local_timestamp,
                        remote,
                        conflict.remote_timestamp,
                    ),
                    ResolutionStrategy::SmartMerge,
                ),
                // With one side gone there is nothing to merge into.
                _ => latest_wins(conflict),
            },
            ResolutionStrategy::Manual => self.apply_manual(conflict, entity_type),
        }
    }

    fn apply_registered_merge(
        &self,
        conflict: &ConflictRecord,
        entity_type: &str,
    ) -> ResolutionOutcome {
        let (Some(local), Some(remote)) = (&conflict.local_value, &conflict.remote_value) else {
            return latest_wins(conflict);
        };

        let merge_fns = match self.merge_fns.read() {
            Ok(merge_fns) => merge_fns,
            Err(_) => return self.apply(ResolutionStrategy::SmartMerge, conflict, entity_type),
        };

        match merge_fns.get(entity_type) {
            Some(merge_fn) => match merge_fn(local, remote) {
                Ok(merged) => ResolutionOutcome::value(merged, ResolutionStrategy::Merge),
                Err(message) => {
                    tracing::warn!(
                        entity_type,
                        entity_id = %conflict.id,
                        %message,
                        "merge function failed, falling back to latest-wins"
                    );
                    latest_wins(conflict)
                }
            },
            None => {
                drop(merge_fns);
                self.apply(ResolutionStrategy::SmartMerge, conflict, entity_type)
            }
        }
    }

    fn apply_manual(&self, conflict: &ConflictRecord, entity_type: &str) -> ResolutionOutcome {
        let manual = match self.manual_resolver.read() {
            Ok(manual) => manual,
            Err(_) => return latest_wins(conflict),
        };

        match manual.as_ref() {
            Some(resolver) => {
                let mut outcome = resolver(conflict);
                outcome.strategy_used = ResolutionStrategy::Manual;
                outcome
            }
            None => {
                tracing::warn!(
                    entity_type,
                    entity_id = %conflict.id,
                    "no manual resolver registered, falling back to latest-wins"
                );
                latest_wins(conflict)
            }
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ResolutionStrategy::default())
    }
}

/// Strictly-greater timestamp wins; ties favor remote. A winning absent
/// side (or both sides absent) resolves to deletion.
fn latest_wins(conflict: &ConflictRecord) -> ResolutionOutcome {
    let winner = if conflict.local_timestamp > conflict.remote_timestamp {
        &conflict.local_value
    } else {
        &conflict.remote_value
    };

    match winner {
        Some(value) => ResolutionOutcome::value(value.clone(), ResolutionStrategy::LatestWins),
        None => ResolutionOutcome::delete(ResolutionStrategy::LatestWins),
    }
}
