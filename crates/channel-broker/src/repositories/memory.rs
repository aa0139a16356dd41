//! In-memory repositories.
//!
//! Behave like the PostgreSQL repositories (uniqueness conflicts,
//! compare-and-set token updates, recording upserts) without a database.
//! Used by the test server harness and service unit tests, together with a
//! few hooks for forcing conflicts and concurrent token refreshes.

use crate::errors::BrokerError;
use crate::models::{
    ChannelRow, OrphanedResource, ParticipantRole, RecordingRow, ResolvedChannel,
    TranscriptionGrant, User,
};
use crate::repositories::{ChannelsRepository, UsersRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct ChannelsState {
    channels: Vec<ChannelRow>,
    recordings: HashMap<Uuid, RecordingRow>,
    orphans: Vec<OrphanedResource>,
    forced_conflicts: usize,
    preempt_token_update: Option<TranscriptionGrant>,
    passphrase_lookups: usize,
    fail_recording_saves: bool,
}

/// In-memory channel repository.
#[derive(Default)]
pub struct InMemoryChannelsRepository {
    state: Mutex<ChannelsState>,
}

impl InMemoryChannelsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChannelsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored channels.
    pub fn channel_count(&self) -> usize {
        self.state().channels.len()
    }

    /// Stored channel by name.
    pub fn channel_by_name(&self, name: &str) -> Option<ChannelRow> {
        self.state()
            .channels
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Overwrite a channel's cached transcription token.
    pub fn set_transcription_token(
        &self,
        name: &str,
        token: Option<&str>,
        expires_in: f64,
        fetched_at: DateTime<Utc>,
    ) {
        let mut state = self.state();
        if let Some(channel) = state.channels.iter_mut().find(|c| c.name == name) {
            channel.transcription_token = token.map(str::to_string);
            channel.transcription_expires_in = expires_in;
            channel.transcription_fetched_at = fetched_at;
        }
    }

    /// Number of `find_by_passphrase` calls so far.
    pub fn passphrase_lookups(&self) -> usize {
        self.state().passphrase_lookups
    }

    /// Make every `save_recording` call fail with a database error.
    pub fn fail_recording_saves(&self) {
        self.state().fail_recording_saves = true;
    }

    /// Make the next `count` inserts fail with a uniqueness conflict.
    pub fn force_insert_conflicts(&self, count: usize) {
        self.state().forced_conflicts = count;
    }

    /// Simulate another request storing `grant` just before the next
    /// compare-and-set token update.
    pub fn preempt_next_token_update(&self, grant: TranscriptionGrant) {
        self.state().preempt_token_update = Some(grant);
    }
}

#[async_trait]
impl ChannelsRepository for InMemoryChannelsRepository {
    async fn insert_channel(&self, channel: &ChannelRow) -> Result<(), BrokerError> {
        let mut state = self.state();

        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Err(BrokerError::Conflict("Duplicate value".to_string()));
        }

        let generated = [
            &channel.name,
            &channel.host_passphrase,
            &channel.viewer_passphrase,
            &channel.secret,
        ];
        let collides = state.channels.iter().any(|existing| {
            existing.channel_id == channel.channel_id
                || [
                    &existing.name,
                    &existing.host_passphrase,
                    &existing.viewer_passphrase,
                    &existing.secret,
                ]
                .iter()
                .any(|value| generated.contains(value))
        });
        if collides {
            return Err(BrokerError::Conflict("Duplicate value".to_string()));
        }

        state.channels.push(channel.clone());
        Ok(())
    }

    async fn find_by_passphrase(
        &self,
        passphrase: &str,
    ) -> Result<Option<ResolvedChannel>, BrokerError> {
        let mut state = self.state();
        state.passphrase_lookups += 1;

        let host = state
            .channels
            .iter()
            .find(|c| c.host_passphrase == passphrase)
            .map(|c| (c, ParticipantRole::Host));
        let found = host.or_else(|| {
            state
                .channels
                .iter()
                .find(|c| c.viewer_passphrase == passphrase)
                .map(|c| (c, ParticipantRole::Viewer))
        });

        Ok(found.map(|(channel, role)| ResolvedChannel {
            channel: channel.clone(),
            role,
        }))
    }

    async fn update_transcription_token(
        &self,
        channel_id: Uuid,
        observed: Option<&str>,
        grant: &TranscriptionGrant,
        fetched_at: DateTime<Utc>,
    ) -> Result<TranscriptionGrant, BrokerError> {
        let mut state = self.state();
        let preempt = state.preempt_token_update.take();

        let channel = state
            .channels
            .iter_mut()
            .find(|c| c.channel_id == channel_id)
            .ok_or_else(|| BrokerError::NotFound("Channel not found".to_string()))?;

        if let Some(winner) = preempt {
            channel.transcription_token = winner.token;
            channel.transcription_expires_in = winner.expires_in;
            channel.transcription_fetched_at = Utc::now();
        }

        if channel.transcription_token.as_deref() == observed {
            channel.transcription_token = grant.token.clone();
            channel.transcription_expires_in = grant.expires_in;
            channel.transcription_fetched_at = fetched_at;
            return Ok(grant.clone());
        }

        Ok(TranscriptionGrant::from_channel(channel))
    }

    async fn save_recording(&self, recording: &RecordingRow) -> Result<(), BrokerError> {
        let mut state = self.state();
        if state.fail_recording_saves {
            return Err(BrokerError::Database("recording save failed".to_string()));
        }
        state
            .recordings
            .insert(recording.channel_id, recording.clone());
        Ok(())
    }

    async fn find_recording(&self, channel_id: Uuid) -> Result<Option<RecordingRow>, BrokerError> {
        Ok(self.state().recordings.get(&channel_id).cloned())
    }

    async fn record_orphaned_resource(
        &self,
        orphan: &OrphanedResource,
    ) -> Result<(), BrokerError> {
        self.state().orphans.push(orphan.clone());
        Ok(())
    }

    async fn list_orphaned_resources(&self) -> Result<Vec<OrphanedResource>, BrokerError> {
        Ok(self.state().orphans.clone())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[derive(Default)]
struct UsersState {
    users: HashMap<String, User>,
    // (token_id, email), insertion ordered
    tokens: Vec<(String, String)>,
}

/// In-memory account repository.
#[derive(Default)]
pub struct InMemoryUsersRepository {
    state: Mutex<UsersState>,
}

impl InMemoryUsersRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, UsersState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an account.
    pub fn insert_user(&self, user: User) {
        self.state().users.insert(user.email.clone(), user);
    }

    /// Issue a session token to an account.
    pub fn insert_token(&self, email: &str, token_id: &str) {
        self.state()
            .tokens
            .push((token_id.to_string(), email.to_string()));
    }
}

#[async_trait]
impl UsersRepository for InMemoryUsersRepository {
    async fn find_user_by_token(&self, token_id: &str) -> Result<Option<User>, BrokerError> {
        let state = self.state();
        Ok(state
            .tokens
            .iter()
            .find(|(token, _)| token == token_id)
            .and_then(|(_, email)| state.users.get(email))
            .cloned())
    }

    async fn update_name(&self, email: &str, name: &str) -> Result<User, BrokerError> {
        let mut state = self.state();
        let user = state
            .users
            .get_mut(email)
            .ok_or_else(|| BrokerError::NotFound("User not found".to_string()))?;
        user.name = name.to_string();
        Ok(user.clone())
    }

    async fn list_tokens(&self, email: &str) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .state()
            .tokens
            .iter()
            .filter(|(_, owner)| owner == email)
            .map(|(token, _)| token.clone())
            .collect())
    }

    async fn delete_token(&self, email: &str, token_id: &str) -> Result<bool, BrokerError> {
        let mut state = self.state();
        let before = state.tokens.len();
        state
            .tokens
            .retain(|(token, owner)| !(owner == email && token == token_id));
        Ok(state.tokens.len() < before)
    }

    async fn delete_all_tokens(&self, email: &str) -> Result<u64, BrokerError> {
        let mut state = self.state();
        let before = state.tokens.len();
        state.tokens.retain(|(_, owner)| owner != email);
        Ok((before - state.tokens.len()) as u64)
    }
}
