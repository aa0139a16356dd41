//! Recording lifecycle controller.
//!
//! Drives a channel through `NoRecording -> Acquired -> Recording -> stopped`.
//! Only the host may start or stop a recording. External calls are made
//! once each; when `start` fails after a successful `acquire`, or a started
//! recording cannot be stored, the resource is persisted as an orphan for
//! an operator sweep.

use crate::config::RecordingStorageConfig;
use crate::errors::BrokerError;
use crate::models::{OrphanedResource, ParticipantRole, RecordingRow, ResolvedChannel, TranscriptionGrant};
use crate::repositories::ChannelsRepository;
use crate::services::credentials::{CredentialIssuer, ParticipantKind};
use crate::services::recording_client::{
    AcquireRequest, RecordingClientTrait, StartRequest, StopRequest,
};
use chrono::Utc;
use common::secret::SecretString;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Controls cloud recordings for channels.
#[derive(Clone)]
pub struct RecordingController {
    client: Arc<dyn RecordingClientTrait>,
    channels: Arc<dyn ChannelsRepository>,
    issuer: CredentialIssuer,
    storage: RecordingStorageConfig,
}

fn require_host(resolved: &ResolvedChannel) -> Result<(), BrokerError> {
    if resolved.role.is_host() {
        Ok(())
    } else {
        Err(BrokerError::Forbidden(
            "Only the host can control recording".to_string(),
        ))
    }
}

impl RecordingController {
    pub fn new(
        client: Arc<dyn RecordingClientTrait>,
        channels: Arc<dyn ChannelsRepository>,
        issuer: CredentialIssuer,
        storage: RecordingStorageConfig,
    ) -> Self {
        Self {
            client,
            channels,
            issuer,
            storage,
        }
    }

    /// Start recording a channel.
    ///
    /// # Errors
    ///
    /// - `BrokerError::Forbidden` for viewers (no external call is made)
    /// - `BrokerError::Upstream` if acquire or start fails
    /// - `BrokerError::Database` if the recording cannot be stored (the
    ///   running recording is kept as an orphan)
    #[instrument(skip_all, name = "broker.services.start_recording", fields(channel_id = %resolved.channel.channel_id))]
    pub async fn start(
        &self,
        resolved: &ResolvedChannel,
        secret: Option<&SecretString>,
    ) -> Result<(), BrokerError> {
        require_host(resolved)?;
        let channel = &resolved.channel;

        // The bot only subscribes; its transcription fields are unused.
        let bot = self.issuer.issue(
            &channel.name,
            ParticipantKind::Primary,
            ParticipantRole::Viewer,
            None,
            &TranscriptionGrant {
                token: None,
                expires_in: 0.0,
            },
        )?;

        let resource_id = self
            .client
            .acquire(&AcquireRequest::new(&channel.name, bot.uid))
            .await?;

        let started_at = Utc::now();
        let request = StartRequest::new(
            &channel.name,
            bot.uid,
            bot.rtc,
            &self.storage,
            secret,
            started_at.timestamp(),
        );

        let session_id = match self.client.start(&resource_id, &request).await {
            Ok(sid) => sid,
            Err(e) => {
                error!(
                    target: "broker.services.recording",
                    resource_id = %resource_id,
                    "Recording start failed after acquire, resource left orphaned"
                );
                self.record_orphan(&channel.name, &resource_id, None, bot.uid)
                    .await;
                return Err(e.into());
            }
        };

        let saved = self
            .channels
            .save_recording(&RecordingRow {
                channel_id: channel.channel_id,
                uid: bot.uid,
                resource_id: resource_id.clone(),
                session_id: session_id.clone(),
                started_at,
            })
            .await;
        if let Err(e) = saved {
            error!(
                target: "broker.services.recording",
                resource_id = %resource_id,
                "Recording started but could not be stored, left orphaned"
            );
            self.record_orphan(&channel.name, &resource_id, Some(&session_id), bot.uid)
                .await;
            return Err(e);
        }

        info!(target: "broker.services.recording", channel_id = %channel.channel_id, "Recording started");
        Ok(())
    }

    /// Stop a channel's recording.
    ///
    /// The stored recording is left in place.
    ///
    /// # Errors
    ///
    /// - `BrokerError::Forbidden` for viewers (no external call is made)
    /// - `BrokerError::NotFound` if the channel was never recorded
    /// - `BrokerError::Upstream` if stop fails
    #[instrument(skip_all, name = "broker.services.stop_recording", fields(channel_id = %resolved.channel.channel_id))]
    pub async fn stop(&self, resolved: &ResolvedChannel) -> Result<(), BrokerError> {
        require_host(resolved)?;
        let channel = &resolved.channel;

        let recording = self
            .channels
            .find_recording(channel.channel_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound("Recording not found".to_string()))?;

        self.client
            .stop(
                &recording.resource_id,
                &recording.session_id,
                &StopRequest::new(&channel.name, recording.uid),
            )
            .await?;

        info!(target: "broker.services.recording", channel_id = %channel.channel_id, "Recording stopped");
        Ok(())
    }

    /// Resource ids acquired for recordings that never started.
    pub async fn orphaned_resources(&self) -> Result<Vec<OrphanedResource>, BrokerError> {
        self.channels.list_orphaned_resources().await
    }

    async fn record_orphan(
        &self,
        channel_name: &str,
        resource_id: &str,
        session_id: Option<&str>,
        uid: u32,
    ) {
        let orphan = OrphanedResource {
            channel_name: channel_name.to_string(),
            resource_id: resource_id.to_string(),
            session_id: session_id.map(str::to_string),
            uid,
            created_at: Utc::now(),
        };
        if let Err(e) = self.channels.record_orphaned_resource(&orphan).await {
            error!(target: "broker.services.recording", error = %e, "Failed to persist orphaned recording resource");
        }
    }
}
