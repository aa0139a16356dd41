//! PostgreSQL channel repository.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Passphrases are bound as parameters and never logged
//! - The transcription token update is a compare-and-set, so concurrent
//!   refreshes never interleave a token with another writer's expiry

use crate::errors::BrokerError;
use crate::models::{
    ChannelRow, OrphanedResource, ParticipantRole, RecordingRow, ResolvedChannel,
    TranscriptionGrant,
};
use crate::repositories::{finish, uid_from_db, ChannelsRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Channel repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgChannelsRepository {
    pool: PgPool,
}

impl PgChannelsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelsRepository for PgChannelsRepository {
    #[instrument(skip_all, name = "broker.repo.insert_channel")]
    async fn insert_channel(&self, channel: &ChannelRow) -> Result<(), BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            INSERT INTO channels (
                channel_id, name, title, host_passphrase, viewer_passphrase,
                secret, dtmf, transcription_token, transcription_expires_in,
                transcription_fetched_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(channel.channel_id) // $1
        .bind(&channel.name) // $2
        .bind(&channel.title) // $3
        .bind(&channel.host_passphrase) // $4
        .bind(&channel.viewer_passphrase) // $5
        .bind(&channel.secret) // $6
        .bind(&channel.dtmf) // $7
        .bind(&channel.transcription_token) // $8
        .bind(channel.transcription_expires_in) // $9
        .bind(channel.transcription_fetched_at) // $10
        .bind(channel.created_at) // $11
        .execute(&self.pool)
        .await;

        finish("insert_channel", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "broker.repo.find_by_passphrase")]
    async fn find_by_passphrase(
        &self,
        passphrase: &str,
    ) -> Result<Option<ResolvedChannel>, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            SELECT
                channel_id, name, title, host_passphrase, viewer_passphrase,
                secret, dtmf, transcription_token, transcription_expires_in,
                transcription_fetched_at, created_at,
                (host_passphrase = $1) AS is_host
            FROM channels
            WHERE host_passphrase = $1 OR viewer_passphrase = $1
            ORDER BY is_host DESC
            LIMIT 1
            "#,
        )
        .bind(passphrase)
        .fetch_optional(&self.pool)
        .await;

        let row = finish("find_by_passphrase", start, result)?;

        Ok(row.map(|row| {
            let role = if row.get::<bool, _>("is_host") {
                ParticipantRole::Host
            } else {
                ParticipantRole::Viewer
            };
            ResolvedChannel {
                channel: map_row_to_channel(&row),
                role,
            }
        }))
    }

    #[instrument(skip_all, name = "broker.repo.update_transcription_token", fields(channel_id = %channel_id))]
    async fn update_transcription_token(
        &self,
        channel_id: Uuid,
        observed: Option<&str>,
        grant: &TranscriptionGrant,
        fetched_at: DateTime<Utc>,
    ) -> Result<TranscriptionGrant, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            UPDATE channels
            SET transcription_token = $3,
                transcription_expires_in = $4,
                transcription_fetched_at = $5
            WHERE channel_id = $1
              AND transcription_token IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(channel_id) // $1
        .bind(observed) // $2
        .bind(&grant.token) // $3
        .bind(grant.expires_in) // $4
        .bind(fetched_at) // $5
        .execute(&self.pool)
        .await;

        let updated = finish("update_transcription_token", start, result)?;
        if updated.rows_affected() == 1 {
            return Ok(grant.clone());
        }

        // Another writer replaced the token first; hand back what it stored.
        tracing::debug!(
            target: "broker.repo.channels",
            channel_id = %channel_id,
            "Transcription token already refreshed by another request"
        );

        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT transcription_token, transcription_expires_in
            FROM channels
            WHERE channel_id = $1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await;

        match finish("reread_transcription_token", start, result)? {
            Some(row) => Ok(TranscriptionGrant {
                token: row.get("transcription_token"),
                expires_in: row.get("transcription_expires_in"),
            }),
            None => Err(BrokerError::NotFound("Channel not found".to_string())),
        }
    }

    #[instrument(skip_all, name = "broker.repo.save_recording", fields(channel_id = %recording.channel_id))]
    async fn save_recording(&self, recording: &RecordingRow) -> Result<(), BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            INSERT INTO recordings (channel_id, uid, resource_id, session_id, started_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (channel_id) DO UPDATE
            SET uid = EXCLUDED.uid,
                resource_id = EXCLUDED.resource_id,
                session_id = EXCLUDED.session_id,
                started_at = EXCLUDED.started_at
            "#,
        )
        .bind(recording.channel_id) // $1
        .bind(i64::from(recording.uid)) // $2
        .bind(&recording.resource_id) // $3
        .bind(&recording.session_id) // $4
        .bind(recording.started_at) // $5
        .execute(&self.pool)
        .await;

        finish("save_recording", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "broker.repo.find_recording", fields(channel_id = %channel_id))]
    async fn find_recording(&self, channel_id: Uuid) -> Result<Option<RecordingRow>, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            SELECT channel_id, uid, resource_id, session_id, started_at
            FROM recordings
            WHERE channel_id = $1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await;

        match finish("find_recording", start, result)? {
            Some(row) => Ok(Some(RecordingRow {
                channel_id: row.get("channel_id"),
                uid: uid_from_db(row.get("uid"))?,
                resource_id: row.get("resource_id"),
                session_id: row.get("session_id"),
                started_at: row.get("started_at"),
            })),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, name = "broker.repo.record_orphaned_resource")]
    async fn record_orphaned_resource(
        &self,
        orphan: &OrphanedResource,
    ) -> Result<(), BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            INSERT INTO orphaned_recording_resources (
                channel_name, resource_id, session_id, uid, created_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&orphan.channel_name) // $1
        .bind(&orphan.resource_id) // $2
        .bind(&orphan.session_id) // $3
        .bind(i64::from(orphan.uid)) // $4
        .bind(orphan.created_at) // $5
        .execute(&self.pool)
        .await;

        finish("record_orphaned_resource", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "broker.repo.list_orphaned_resources")]
    async fn list_orphaned_resources(&self) -> Result<Vec<OrphanedResource>, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            SELECT channel_name, resource_id, session_id, uid, created_at
            FROM orphaned_recording_resources
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        finish("list_orphaned_resources", start, result)?
            .into_iter()
            .map(|row| {
                Ok(OrphanedResource {
                    channel_name: row.get("channel_name"),
                    resource_id: row.get("resource_id"),
                    session_id: row.get("session_id"),
                    uid: uid_from_db(row.get("uid"))?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        finish("ping", start, result).map(|_| ())
    }
}

/// Map a database row to ChannelRow.
fn map_row_to_channel(row: &PgRow) -> ChannelRow {
    ChannelRow {
        channel_id: row.get("channel_id"),
        name: row.get("name"),
        title: row.get("title"),
        host_passphrase: row.get("host_passphrase"),
        viewer_passphrase: row.get("viewer_passphrase"),
        secret: row.get("secret"),
        dtmf: row.get("dtmf"),
        transcription_token: row.get("transcription_token"),
        transcription_expires_in: row.get("transcription_expires_in"),
        transcription_fetched_at: row.get("transcription_fetched_at"),
        created_at: row.get("created_at"),
    }
}
