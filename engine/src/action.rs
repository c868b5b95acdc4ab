//! Pending action types: the queued local mutations awaiting sync.
//!
//! A mutation made while offline (or eagerly queued for durability) becomes
//! a [`PendingAction`]. Actions live in the queue until they are applied to
//! the remote service or exhaust their retry budget.

use crate::{ActionId, EntityId, EntityType, Timestamp};
use serde::{Deserialize, Serialize};

/// What kind of mutation a queued action represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Query,
}

/// Priority of a queued action.
///
/// Variant order matters: `High < Medium < Low`, so an ascending sort by
/// priority puts urgent work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank used as the primary queue sort key (High = 0).
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// A caller-supplied action before the queue assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    /// Kind of mutation
    pub kind: ActionKind,
    /// Entity namespace, used to select merge behavior
    pub entity_type: EntityType,
    /// Target entity; required for updates and deletes
    pub entity_id: Option<EntityId>,
    /// Local data snapshot at enqueue time
    pub payload: serde_json::Value,
    /// Queue priority
    pub priority: Priority,
    /// Retry budget override; engine default applies when `None`
    pub max_retries: Option<u32>,
}

impl NewAction {
    /// A medium-priority action with no entity id.
    pub fn new(
        kind: ActionKind,
        entity_type: impl Into<EntityType>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            entity_type: entity_type.into(),
            entity_id: None,
            payload,
            priority: Priority::default(),
            max_retries: None,
        }
    }

    /// Set the target entity id.
    pub fn with_entity_id(mut self, id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Set the queue priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the retry budget for this action.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A queued mutation awaiting application to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Unique id, generated at enqueue time
    pub id: ActionId,
    /// Kind of mutation
    pub kind: ActionKind,
    /// Entity namespace, used to select merge behavior
    pub entity_type: EntityType,
    /// Target entity; required for updates and deletes
    pub entity_id: Option<EntityId>,
    /// Local data snapshot at enqueue time
    pub payload: serde_json::Value,
    /// When the action was enqueued (ms since epoch); secondary sort key
    /// and the conflict timestamp fallback
    pub enqueued_at: Timestamp,
    /// Queue priority
    pub priority: Priority,
    /// Failed attempts so far; invariant `retry_count <= max_retries`
    pub retry_count: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Diagnostic from the most recent failure
    pub last_error: Option<String>,
}

impl PendingAction {
    /// Materialize a caller action with an assigned id and timestamp.
    pub fn from_new(new: NewAction, default_max_retries: u32, enqueued_at: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: new.kind,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            payload: new.payload,
            enqueued_at,
            priority: new.priority,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(default_max_retries),
            last_error: None,
        }
    }

    /// Queue ordering: priority rank first, then oldest first.
    pub fn sort_key(&self) -> (u8, Timestamp) {
        (self.priority.rank(), self.enqueued_at)
    }

    /// Whether the retry budget is spent. Exhausted actions are skipped by
    /// sync cycles but retained for manual inspection.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Record a failed attempt.
    ///
    /// Increments the retry count (saturating at the budget) and, on the
    /// attempt that spends the budget, demotes the action to low priority.
    /// Returns `true` when this call made the action exhausted.
    pub fn record_failure(&mut self, error: &str) -> bool {
        let was_exhausted = self.is_exhausted();
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.last_error = Some(error.to_string());

        if !was_exhausted && self.is_exhausted() {
            self.priority = Priority::Low;
            return true;
        }
        false
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(kind: ActionKind) -> PendingAction {
        PendingAction::from_new(
            NewAction::new(kind, "order", json!({"qty": 1})),
            3,
            1_000,
        )
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::High.rank(), 0);
        assert_eq!(Priority::Low.rank(), 2);
    }

    #[test]
    fn from_new_assigns_id_and_defaults() {
        let a = action(ActionKind::Create);
        assert!(!a.id.is_empty());
        assert_eq!(a.enqueued_at, 1_000);
        assert_eq!(a.retry_count, 0);
        assert_eq!(a.max_retries, 3);
        assert_eq!(a.priority, Priority::Medium);
        assert!(a.last_error.is_none());

        let b = action(ActionKind::Create);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn builder_overrides() {
        let new = NewAction::new(ActionKind::Update, "order", json!({}))
            .with_entity_id("ord-1")
            .with_priority(Priority::High)
            .with_max_retries(7);
        let a = PendingAction::from_new(new, 3, 0);

        assert_eq!(a.entity_id.as_deref(), Some("ord-1"));
        assert_eq!(a.priority, Priority::High);
        assert_eq!(a.max_retries, 7);
    }

    #[test]
    fn record_failure_demotes_exactly_once() {
        let mut a = action(ActionKind::Update);

        assert!(!a.record_failure("boom 1"));
        assert!(!a.record_failure("boom 2"));
        assert_eq!(a.priority, Priority::Medium);

        // Third failure spends the budget and demotes.
        assert!(a.record_failure("boom 3"));
        assert!(a.is_exhausted());
        assert_eq!(a.priority, Priority::Low);
        assert_eq!(a.retry_count, 3);
        assert_eq!(a.last_error.as_deref(), Some("boom 3"));

        // Further failures never re-trigger the demotion and the count
        // saturates at the budget.
        assert!(!a.record_failure("boom 4"));
        assert_eq!(a.retry_count, 3);
    }

    #[test]
    fn sort_key_priority_then_age() {
        let mut high = action(ActionKind::Create);
        high.priority = Priority::High;
        high.enqueued_at = 5_000;

        let mut old_medium = action(ActionKind::Create);
        old_medium.enqueued_at = 1_000;

        let mut young_medium = action(ActionKind::Create);
        young_medium.enqueued_at = 2_000;

        let mut keys = vec![
            young_medium.sort_key(),
            high.sort_key(),
            old_medium.sort_key(),
        ];
        keys.sort();
        assert_eq!(keys, vec![(0, 5_000), (1, 1_000), (1, 2_000)]);
    }

    #[test]
    fn serialization_roundtrip() {
        let a = PendingAction::from_new(
            NewAction::new(ActionKind::Update, "collection", json!({"items": [1, 2]}))
                .with_entity_id("col-9"),
            3,
            42,
        );

        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"entityType\"")); // camelCase
        assert!(json.contains("\"kind\":\"update\""));

        let parsed: PendingAction = serde_json::from_str(&json).unwrap();
        assert_eq!(a, parsed);
    }
}
