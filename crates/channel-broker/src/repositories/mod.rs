//! Repository layer for the Channel Broker.
//!
//! Provides store access following the Handler -> Service -> Repository
//! architecture. Services depend on the traits below; the PostgreSQL
//! implementations back the running service and the in-memory ones back
//! the test harness.

pub mod channels;
pub mod memory;
pub mod users;

use crate::errors::BrokerError;
use crate::models::{
    ChannelRow, OrphanedResource, RecordingRow, ResolvedChannel, TranscriptionGrant, User,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

pub use channels::PgChannelsRepository;
pub use memory::{InMemoryChannelsRepository, InMemoryUsersRepository};
pub use users::PgUsersRepository;

/// Channel, recording and orphaned-resource storage.
#[async_trait]
pub trait ChannelsRepository: Send + Sync {
    /// Insert a new channel.
    ///
    /// Returns `BrokerError::Conflict` when a generated identifier collides.
    async fn insert_channel(&self, channel: &ChannelRow) -> Result<(), BrokerError>;

    /// Find the channel whose host or viewer passphrase equals `passphrase`.
    ///
    /// A host match wins over a viewer match.
    async fn find_by_passphrase(
        &self,
        passphrase: &str,
    ) -> Result<Option<ResolvedChannel>, BrokerError>;

    /// Replace the cached transcription token if it still equals `observed`.
    ///
    /// Returns the pair stored after the call: `grant` when this writer won,
    /// or the concurrent writer's pair otherwise.
    async fn update_transcription_token(
        &self,
        channel_id: Uuid,
        observed: Option<&str>,
        grant: &TranscriptionGrant,
        fetched_at: DateTime<Utc>,
    ) -> Result<TranscriptionGrant, BrokerError>;

    /// Persist recording state for a channel, replacing any previous row.
    async fn save_recording(&self, recording: &RecordingRow) -> Result<(), BrokerError>;

    /// Recording state for a channel, if one was ever started.
    async fn find_recording(&self, channel_id: Uuid) -> Result<Option<RecordingRow>, BrokerError>;

    /// Remember a resource id whose start call failed.
    async fn record_orphaned_resource(&self, orphan: &OrphanedResource)
        -> Result<(), BrokerError>;

    /// All orphaned resource ids, oldest first.
    async fn list_orphaned_resources(&self) -> Result<Vec<OrphanedResource>, BrokerError>;

    /// Connectivity check used by the readiness probe.
    async fn ping(&self) -> Result<(), BrokerError>;
}

/// Account and session-token storage.
#[async_trait]
pub trait UsersRepository: Send + Sync {
    /// The account owning session token `token_id`.
    async fn find_user_by_token(&self, token_id: &str) -> Result<Option<User>, BrokerError>;

    /// Set the display name of an account.
    async fn update_name(&self, email: &str, name: &str) -> Result<User, BrokerError>;

    /// Session token ids owned by an account.
    async fn list_tokens(&self, email: &str) -> Result<Vec<String>, BrokerError>;

    /// Delete one of an account's tokens. Returns `false` if it was not found.
    async fn delete_token(&self, email: &str, token_id: &str) -> Result<bool, BrokerError>;

    /// Delete all of an account's tokens. Returns the number removed.
    async fn delete_all_tokens(&self, email: &str) -> Result<u64, BrokerError>;
}

/// Record query metrics and convert the error.
pub(crate) fn finish<T>(
    operation: &str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, BrokerError> {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_db_query(operation, status, start.elapsed());
    result.map_err(BrokerError::from)
}

/// Convert a stored BIGINT uid back to a participant uid.
pub(crate) fn uid_from_db(value: i64) -> Result<u32, BrokerError> {
    u32::try_from(value).map_err(|_| BrokerError::Database(format!("uid out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_from_db_range() {
        assert_eq!(uid_from_db(0).ok(), Some(0));
        assert_eq!(uid_from_db(i64::from(u32::MAX)).ok(), Some(u32::MAX));
        assert!(uid_from_db(-1).is_err());
        assert!(uid_from_db(i64::from(u32::MAX) + 1).is_err());
    }
}
