//! Passphrase registry.
//!
//! Mints channel identities (name, host passphrase, viewer passphrase,
//! media secret) and resolves presented passphrases back to channels.
//!
//! # Security
//!
//! - Every identifier is a v4 UUID built from CSPRNG bytes (ring `SystemRandom`)
//! - Passphrases are never logged
//! - An empty passphrase is rejected before the store is queried

use crate::errors::BrokerError;
use crate::models::{ChannelRow, ResolvedChannel, TranscriptionGrant};
use crate::observability::metrics;
use crate::repositories::ChannelsRepository;
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Maximum attempts when a generated identifier collides with a stored one.
const MAX_IDENTITY_COLLISION_RETRIES: usize = 3;

/// Number of digits in a PSTN dial-in code.
pub const DTMF_LENGTH: usize = 6;

/// Generated identifiers for a new channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    /// Channel name, a UUID without separators.
    pub name: String,

    /// Host passphrase, a hyphenated UUID.
    pub host_passphrase: String,

    /// Viewer passphrase, a hyphenated UUID.
    pub viewer_passphrase: String,

    /// Media secret, a UUID without separators.
    pub secret: String,
}

impl ChannelIdentity {
    /// Whether all four identifiers differ from one another.
    fn is_pairwise_distinct(&self) -> bool {
        let values = [
            self.name.as_str(),
            self.host_passphrase.as_str(),
            self.viewer_passphrase.as_str(),
            self.secret.as_str(),
        ];
        values
            .iter()
            .enumerate()
            .all(|(i, a)| values.iter().skip(i + 1).all(|b| a != b))
    }
}

/// Everything about a new channel except its generated identity.
#[derive(Debug, Clone)]
pub struct ChannelDraft {
    pub title: String,
    pub dtmf: Option<String>,
    pub transcription: TranscriptionGrant,
    pub created_at: DateTime<Utc>,
}

/// Mint a fresh channel identity.
///
/// # Errors
///
/// Returns `BrokerError::Generation` if the system RNG fails.
pub fn create_channel_identity() -> Result<ChannelIdentity, BrokerError> {
    let rng = SystemRandom::new();

    let host_passphrase = generate_uuid(&rng)?.hyphenated().to_string();
    let viewer_passphrase = generate_uuid(&rng)?.hyphenated().to_string();
    let name = generate_uuid(&rng)?.simple().to_string();
    let secret = generate_uuid(&rng)?.simple().to_string();

    Ok(ChannelIdentity {
        name,
        host_passphrase,
        viewer_passphrase,
        secret,
    })
}

/// Generate a PSTN dial-in code of [`DTMF_LENGTH`] decimal digits.
///
/// # Errors
///
/// Returns `BrokerError::Generation` if the system RNG fails.
pub fn generate_dtmf() -> Result<String, BrokerError> {
    let rng = SystemRandom::new();
    let mut dtmf = String::with_capacity(DTMF_LENGTH);

    while dtmf.len() < DTMF_LENGTH {
        let mut bytes = [0u8; DTMF_LENGTH];
        fill_random(&rng, &mut bytes)?;

        // 250 is the largest multiple of 10 below 256; rejecting above it
        // keeps every digit equally likely.
        for b in bytes.iter().filter(|b| **b < 250) {
            if dtmf.len() == DTMF_LENGTH {
                break;
            }
            dtmf.push(char::from(b'0' + b % 10));
        }
    }

    Ok(dtmf)
}

fn fill_random(rng: &SystemRandom, bytes: &mut [u8]) -> Result<(), BrokerError> {
    rng.fill(bytes).map_err(|e| {
        tracing::error!(target: "broker.services.passphrase", error = %e, "Failed to generate random bytes");
        BrokerError::Generation("RNG failure".to_string())
    })
}

fn generate_uuid(rng: &SystemRandom) -> Result<Uuid, BrokerError> {
    let mut bytes = [0u8; 16];
    fill_random(rng, &mut bytes)?;

    Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
}

/// Creates channels and resolves passphrases against the store.
#[derive(Clone)]
pub struct PassphraseRegistry {
    channels: Arc<dyn ChannelsRepository>,
}

impl PassphraseRegistry {
    pub fn new(channels: Arc<dyn ChannelsRepository>) -> Self {
        Self { channels }
    }

    /// Persist a new channel under a freshly minted identity.
    ///
    /// Retries with a new identity up to [`MAX_IDENTITY_COLLISION_RETRIES`]
    /// times when the store reports a uniqueness conflict.
    #[instrument(skip_all, name = "broker.services.register_channel")]
    pub async fn register(&self, draft: ChannelDraft) -> Result<ChannelRow, BrokerError> {
        for attempt in 0..MAX_IDENTITY_COLLISION_RETRIES {
            let identity = create_channel_identity()?;
            if !identity.is_pairwise_distinct() {
                warn!(target: "broker.services.passphrase", attempt = attempt, "Generated identifiers overlap, regenerating");
                continue;
            }

            let channel = ChannelRow {
                channel_id: generate_uuid(&SystemRandom::new())?,
                name: identity.name,
                title: draft.title.clone(),
                host_passphrase: identity.host_passphrase,
                viewer_passphrase: identity.viewer_passphrase,
                secret: identity.secret,
                dtmf: draft.dtmf.clone(),
                transcription_token: draft.transcription.token.clone(),
                transcription_expires_in: draft.transcription.expires_in,
                transcription_fetched_at: draft.created_at,
                created_at: draft.created_at,
            };

            match self.channels.insert_channel(&channel).await {
                Ok(()) => return Ok(channel),
                Err(BrokerError::Conflict(_)) => {
                    warn!(target: "broker.services.passphrase", attempt = attempt, "Channel identifier collision, retrying");
                    metrics::record_channel_operation("create", "collision");
                }
                Err(e) => return Err(e),
            }
        }

        Err(BrokerError::Generation(
            "Failed to generate a unique channel identity".to_string(),
        ))
    }

    /// Resolve a passphrase to its channel and the caller's role.
    ///
    /// # Errors
    ///
    /// - `BrokerError::BadRequest` for an empty passphrase (no lookup is made)
    /// - `BrokerError::NotFound` if no channel matches
    #[instrument(skip_all, name = "broker.services.resolve_passphrase")]
    pub async fn resolve_passphrase(&self, passphrase: &str) -> Result<ResolvedChannel, BrokerError> {
        if passphrase.trim().is_empty() {
            return Err(BrokerError::BadRequest(
                "Passphrase cannot be empty".to_string(),
            ));
        }

        self.channels
            .find_by_passphrase(passphrase)
            .await?
            .ok_or_else(|| BrokerError::NotFound("Invalid passphrase".to_string()))
    }
}
