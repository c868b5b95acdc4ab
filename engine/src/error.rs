//! Error types for the Ebb engine.

use crate::ActionId;
use thiserror::Error;

/// All possible errors from the sync engine.
///
/// Per-action errors never crash the host: they are recorded on
/// [`PendingAction::last_error`](crate::PendingAction) and surfaced through
/// the statistics recorder. Only a persistence failure aborts a sync cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transient transport failure (including timeouts). Always retried.
    #[error("network error: {0}")]
    Network(String),

    /// The remote reports the entity does not exist (404). Semantic
    /// "entity deleted", not a retryable failure.
    #[error("remote entity not found: {entity_type}/{id}")]
    RemoteNotFound { entity_type: String, id: String },

    /// The remote rejected the request with a non-404 4xx. Retried up to
    /// the budget, never converted into a conflict.
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// The durable local store failed. The running cycle aborts and the
    /// in-memory queue is retained, so nothing is lost.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A caller-supplied merge callback failed. Caught at the resolver and
    /// replaced by a latest-wins resolution.
    #[error("merge function failed for '{entity_type}': {message}")]
    MergeFunction {
        entity_type: String,
        message: String,
    },

    /// A queued update or delete is missing the entity id it needs.
    #[error("action {0} is missing an entity id")]
    MissingEntityId(ActionId),
}

impl SyncError {
    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// `RemoteNotFound` is handled semantically by the queue manager and
    /// never reaches retry accounting as an error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::RemoteRejected { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
