//! Credential issuance for channel participants.
//!
//! Each participant connection gets a numeric uid and an RTC token bound
//! to it. A join issues two connections (camera/microphone and screen
//! share); their uids are drawn from disjoint ranges so they never collide.

use crate::config::CredentialConfig;
use crate::errors::BrokerError;
use crate::models::{ParticipantRole, TranscriptionGrant, UserCredentials};
use chrono::Utc;
use common::jwt::{MediaTokenSigner, RtcRole};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::instrument;

/// Highest uid available to primary connections.
pub const PRIMARY_UID_MAX: u32 = 0x7FFF_FFFF;

/// Lowest uid available to screen-share connections.
pub const SCREEN_SHARE_UID_MIN: u32 = 0x8000_0000;

/// Kind of participant connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKind {
    /// Camera/microphone connection. Uids in `1..=0x7FFF_FFFF`.
    Primary,

    /// Screen-share connection. Uids in `0x8000_0000..=0xFFFF_FFFF`.
    ScreenShare,
}

impl ParticipantKind {
    /// Map 32 bits of entropy to a uid in this kind's range.
    pub fn derive_uid(self, entropy: u32) -> u32 {
        match self {
            ParticipantKind::Primary => (entropy & PRIMARY_UID_MAX).max(1),
            ParticipantKind::ScreenShare => entropy | SCREEN_SHARE_UID_MIN,
        }
    }
}

impl From<ParticipantRole> for RtcRole {
    fn from(role: ParticipantRole) -> Self {
        match role {
            ParticipantRole::Host => RtcRole::Publisher,
            ParticipantRole::Viewer => RtcRole::Subscriber,
        }
    }
}

/// Issues participant credentials.
#[derive(Clone, Debug)]
pub struct CredentialIssuer {
    signer: MediaTokenSigner,
    issue_rtm: bool,
    rng: SystemRandom,
}

impl CredentialIssuer {
    /// Create an issuer. RTM tokens are only issued when `issue_rtm` is set
    /// (user accounts enabled).
    pub fn new(config: &CredentialConfig, issue_rtm: bool) -> Self {
        Self {
            signer: MediaTokenSigner::new(config.app_id.clone(), config.app_certificate.clone()),
            issue_rtm,
            rng: SystemRandom::new(),
        }
    }

    /// The signer, for verifying issued tokens.
    pub fn signer(&self) -> &MediaTokenSigner {
        &self.signer
    }

    /// Issue credentials for one connection to `channel_name`.
    ///
    /// `account` binds the RTM token; it is ignored when RTM is disabled.
    ///
    /// # Errors
    ///
    /// - `BrokerError::Generation` if the RNG fails
    /// - `BrokerError::Internal` if signing fails
    #[instrument(skip_all, name = "broker.services.issue_credentials", fields(kind = ?kind, role = role.as_str()))]
    pub fn issue(
        &self,
        channel_name: &str,
        kind: ParticipantKind,
        role: ParticipantRole,
        account: Option<&str>,
        transcription: &TranscriptionGrant,
    ) -> Result<UserCredentials, BrokerError> {
        let uid = kind.derive_uid(self.next_entropy()?);
        let now = Utc::now().timestamp();

        let rtc = self.signer.sign_rtc(channel_name, uid, role.into(), now)?;

        let rtm = match (self.issue_rtm, account) {
            (true, Some(account)) => Some(self.signer.sign_rtm(account, now)?),
            _ => None,
        };

        Ok(UserCredentials {
            rtc,
            rtm,
            transcription_token: transcription.token.clone(),
            transcription_expires_in: transcription.expires_in,
            uid,
        })
    }

    fn next_entropy(&self) -> Result<u32, BrokerError> {
        let mut bytes = [0u8; 4];
        self.rng.fill(&mut bytes).map_err(|e| {
            tracing::error!(target: "broker.services.credentials", error = %e, "Failed to generate random bytes");
            BrokerError::Generation("RNG failure".to_string())
        })?;
        Ok(u32::from_be_bytes(bytes))
    }
}
