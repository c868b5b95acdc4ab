//! The remote data service collaborator.
//!
//! The engine never talks HTTP itself; the host supplies an implementation
//! of [`RemoteService`] and maps transport outcomes onto the
//! [`SyncError`](crate::SyncError) taxonomy: 404 becomes `RemoteNotFound`,
//! other 4xx become `RemoteRejected`, and transport failures (timeouts
//! included) become `Network`.

use crate::{error::Result, Timestamp};
use async_trait::async_trait;

/// The current remote state of an entity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// The remote payload
    pub payload: serde_json::Value,
    /// When the remote last modified it (ms since epoch)
    pub updated_at: Timestamp,
}

impl RemoteRecord {
    pub fn new(payload: serde_json::Value, updated_at: Timestamp) -> Self {
        Self {
            payload,
            updated_at,
        }
    }
}

/// Interface the backend presents to the engine.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch the current remote value of an entity.
    async fn get(&self, entity_type: &str, id: &str) -> Result<RemoteRecord>;

    /// Create an entity. The id is optional for server-assigned ids.
    async fn create(
        &self,
        entity_type: &str,
        id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<()>;

    /// Replace an entity's value.
    async fn update(&self, entity_type: &str, id: &str, payload: &serde_json::Value) -> Result<()>;

    /// Delete an entity.
    async fn delete(&self, entity_type: &str, id: &str) -> Result<()>;
}
