//! Channel session assembly.
//!
//! Composes the passphrase registry, credential issuer and transcription
//! token cache into the three channel operations: create, join and share.

use crate::errors::BrokerError;
use crate::models::{
    ChannelRow, ParticipantRole, Passphrase, Pstn, Session, ShareResponse, TranscriptionGrant,
    User, MAX_TITLE_LENGTH,
};
use crate::observability::metrics;
use crate::services::credentials::{CredentialIssuer, ParticipantKind};
use crate::services::passphrase::{generate_dtmf, ChannelDraft, PassphraseRegistry};
use crate::services::transcription::TranscriptionTokenCache;
use chrono::Utc;
use tracing::{info, instrument};

/// Builds channel sessions and share payloads.
#[derive(Clone)]
pub struct SessionAssembler {
    registry: PassphraseRegistry,
    issuer: CredentialIssuer,
    transcription: TranscriptionTokenCache,
    pstn_number: Option<String>,
    require_account: bool,
}

/// Record the outcome of a channel operation and pass the result through.
fn track<T>(operation: &str, result: Result<T, BrokerError>) -> Result<T, BrokerError> {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_channel_operation(operation, status);
    result
}

/// Trim and validate a channel title.
fn validate_title(title: &str) -> Result<String, BrokerError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(BrokerError::BadRequest("Title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(BrokerError::BadRequest(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title.to_string())
}

impl SessionAssembler {
    /// Create an assembler.
    ///
    /// When `require_account` is set (user accounts enabled), creating a
    /// channel requires an authenticated caller.
    pub fn new(
        registry: PassphraseRegistry,
        issuer: CredentialIssuer,
        transcription: TranscriptionTokenCache,
        pstn_number: Option<String>,
        require_account: bool,
    ) -> Self {
        Self {
            registry,
            issuer,
            transcription,
            pstn_number,
            require_account,
        }
    }

    fn check_caller(&self, caller: Option<&User>) -> Result<(), BrokerError> {
        if self.require_account && caller.is_none() {
            return Err(BrokerError::InvalidToken(
                "Authentication required".to_string(),
            ));
        }
        Ok(())
    }

    fn pstn_for(&self, channel: &ChannelRow) -> Option<Pstn> {
        channel.dtmf.as_ref().map(|dtmf| Pstn {
            number: self.pstn_number.clone().unwrap_or_default(),
            dtmf: dtmf.clone(),
        })
    }

    fn share_payload(&self, channel: &ChannelRow, role: ParticipantRole) -> ShareResponse {
        ShareResponse {
            passphrase: Passphrase {
                host: role.is_host().then(|| channel.host_passphrase.clone()),
                view: channel.viewer_passphrase.clone(),
                transcription_token: channel.transcription_token.clone(),
                transcription_expires_in: channel.transcription_expires_in,
            },
            channel: channel.name.clone(),
            title: channel.title.clone(),
            pstn: self.pstn_for(channel),
        }
    }

    /// Create a channel.
    ///
    /// # Errors
    ///
    /// - `BrokerError::InvalidToken` if accounts are required and the caller is anonymous
    /// - `BrokerError::BadRequest` for an invalid title, or PSTN requested
    ///   without a configured dial-in number
    /// - `BrokerError::Generation` / `BrokerError::Database` on internal failure
    #[instrument(skip_all, name = "broker.services.create_channel", fields(enable_pstn = enable_pstn))]
    pub async fn create_channel(
        &self,
        title: &str,
        enable_pstn: bool,
        caller: Option<&User>,
    ) -> Result<ShareResponse, BrokerError> {
        track("create", self.create_channel_inner(title, enable_pstn, caller).await)
    }

    async fn create_channel_inner(
        &self,
        title: &str,
        enable_pstn: bool,
        caller: Option<&User>,
    ) -> Result<ShareResponse, BrokerError> {
        self.check_caller(caller)?;
        let title = validate_title(title)?;

        if enable_pstn && self.pstn_number.is_none() {
            return Err(BrokerError::BadRequest(
                "PSTN dial-in is not available".to_string(),
            ));
        }

        let dtmf = if enable_pstn {
            Some(generate_dtmf()?)
        } else {
            None
        };

        let transcription = self.transcription.initial_token().await;

        let channel = self
            .registry
            .register(ChannelDraft {
                title,
                dtmf,
                transcription,
                created_at: Utc::now(),
            })
            .await?;

        info!(target: "broker.services.session", channel_id = %channel.channel_id, "Channel created");

        Ok(self.share_payload(&channel, ParticipantRole::Host))
    }

    /// Join a channel.
    ///
    /// Issues two credentials: one for the primary connection and one for
    /// screen share. Refreshes the channel's transcription token if stale.
    ///
    /// The passphrase is the only credential; an anonymous caller joins
    /// without an RTM token.
    ///
    /// # Errors
    ///
    /// - `BrokerError::BadRequest` / `BrokerError::NotFound` for a bad passphrase
    #[instrument(skip_all, name = "broker.services.join_channel")]
    pub async fn join_channel(
        &self,
        passphrase: &str,
        caller: Option<&User>,
    ) -> Result<Session, BrokerError> {
        track("join", self.join_channel_inner(passphrase, caller).await)
    }

    async fn join_channel_inner(
        &self,
        passphrase: &str,
        caller: Option<&User>,
    ) -> Result<Session, BrokerError> {
        let resolved = self.registry.resolve_passphrase(passphrase).await?;
        let channel = &resolved.channel;

        let transcription: TranscriptionGrant = self.transcription.ensure_token(channel).await?;
        let account = caller.map(|user| user.email.as_str());

        let main_user = self.issuer.issue(
            &channel.name,
            ParticipantKind::Primary,
            resolved.role,
            account,
            &transcription,
        )?;
        let screen_share = self.issuer.issue(
            &channel.name,
            ParticipantKind::ScreenShare,
            resolved.role,
            account,
            &transcription,
        )?;

        Ok(Session {
            title: channel.title.clone(),
            channel: channel.name.clone(),
            is_host: resolved.role.is_host(),
            secret: channel.secret.clone(),
            main_user,
            screen_share,
        })
    }

    /// Shareable description of a channel.
    ///
    /// The host passphrase is only included for the host.
    #[instrument(skip_all, name = "broker.services.share_channel")]
    pub async fn share(&self, passphrase: &str) -> Result<ShareResponse, BrokerError> {
        track(
            "share",
            self.registry
                .resolve_passphrase(passphrase)
                .await
                .map(|resolved| self.share_payload(&resolved.channel, resolved.role)),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::CredentialConfig;
    use crate::repositories::InMemoryChannelsRepository;
    use crate::services::credentials::SCREEN_SHARE_UID_MIN;
    use crate::services::transcription::mock::MockTranscriptionClient;
    use common::jwt::RtcRole;
    use common::secret::SecretString;
    use std::sync::Arc;

    struct Fixture {
        assembler: SessionAssembler,
        transcription: Arc<MockTranscriptionClient>,
        repo: Arc<InMemoryChannelsRepository>,
        issuer: CredentialIssuer,
    }

    fn fixture(pstn_number: Option<&str>, require_account: bool) -> Fixture {
        let repo = Arc::new(InMemoryChannelsRepository::new());
        let transcription = Arc::new(MockTranscriptionClient::returning("symbl", 3600.0));
        let issuer = CredentialIssuer::new(
            &CredentialConfig {
                app_id: "app-id".to_string(),
                app_certificate: SecretString::from("cert"),
            },
            require_account,
        );

        let assembler = SessionAssembler::new(
            PassphraseRegistry::new(repo.clone()),
            issuer.clone(),
            TranscriptionTokenCache::new(transcription.clone(), repo.clone()),
            pstn_number.map(str::to_string),
            require_account,
        );

        Fixture {
            assembler,
            transcription,
            repo,
            issuer,
        }
    }

    fn alice() -> User {
        User {
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("  Standup  ").unwrap(), "Standup");
        assert!(validate_title("").is_err());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"a".repeat(MAX_TITLE_LENGTH)).is_ok());
        assert!(validate_title(&"a".repeat(MAX_TITLE_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_create_channel_returns_distinct_identifiers() {
        let f = fixture(None, false);

        let share = f.assembler.create_channel("Standup", false, None).await.unwrap();

        let host = share.passphrase.host.clone().unwrap();
        assert_ne!(host, share.passphrase.view);
        assert_eq!(share.title, "Standup");
        assert!(share.pstn.is_none());
        assert_eq!(share.passphrase.transcription_token.as_deref(), Some("symbl"));
        assert_eq!(f.transcription.call_count(), 1);

        let stored = f.repo.channel_by_name(&share.channel).unwrap();
        assert_ne!(stored.secret, host);
        assert_ne!(stored.secret, share.passphrase.view);
    }

    #[tokio::test]
    async fn test_create_channel_with_pstn() {
        let f = fixture(Some("+1 800 555 0100"), false);

        let share = f.assembler.create_channel("Standup", true, None).await.unwrap();

        let pstn = share.pstn.unwrap();
        assert_eq!(pstn.number, "+1 800 555 0100");
        assert_eq!(pstn.dtmf.len(), 6);
    }

    #[tokio::test]
    async fn test_create_channel_pstn_without_number_rejected() {
        let f = fixture(None, false);

        let result = f.assembler.create_channel("Standup", true, None).await;
        assert!(matches!(result, Err(BrokerError::BadRequest(_))));
        assert_eq!(f.repo.channel_count(), 0);
        assert_eq!(f.transcription.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_requires_account_when_enabled() {
        let f = fixture(None, true);

        let result = f.assembler.create_channel("Standup", false, None).await;
        assert!(matches!(result, Err(BrokerError::InvalidToken(_))));

        let user = alice();
        assert!(f
            .assembler
            .create_channel("Standup", false, Some(&user))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_join_as_host_and_viewer() {
        let f = fixture(None, false);
        let share = f.assembler.create_channel("Standup", false, None).await.unwrap();

        let host = f
            .assembler
            .join_channel(&share.passphrase.host.clone().unwrap(), None)
            .await
            .unwrap();
        assert!(host.is_host);
        assert_eq!(host.channel, share.channel);
        assert_ne!(host.main_user.uid, host.screen_share.uid);
        assert!(host.main_user.uid < SCREEN_SHARE_UID_MIN);
        assert!(host.screen_share.uid >= SCREEN_SHARE_UID_MIN);
        let claims = f.issuer.signer().verify_rtc(&host.main_user.rtc).unwrap();
        assert_eq!(claims.role, RtcRole::Publisher);

        let viewer = f
            .assembler
            .join_channel(&share.passphrase.view, None)
            .await
            .unwrap();
        assert!(!viewer.is_host);
        assert_eq!(viewer.secret, host.secret);
        let claims = f.issuer.signer().verify_rtc(&viewer.screen_share.rtc).unwrap();
        assert_eq!(claims.role, RtcRole::Subscriber);
    }

    #[tokio::test]
    async fn test_join_issues_rtm_for_account() {
        let f = fixture(None, true);
        let user = alice();
        let share = f
            .assembler
            .create_channel("Standup", false, Some(&user))
            .await
            .unwrap();

        let session = f
            .assembler
            .join_channel(&share.passphrase.view, Some(&user))
            .await
            .unwrap();

        let rtm = session.main_user.rtm.unwrap();
        assert_eq!(f.issuer.signer().verify_rtm(&rtm).unwrap().sub, "alice@example.com");
    }

    #[tokio::test]
    async fn test_anonymous_join_with_accounts_enabled() {
        let f = fixture(None, true);
        let user = alice();
        let share = f
            .assembler
            .create_channel("Standup", false, Some(&user))
            .await
            .unwrap();

        let session = f
            .assembler
            .join_channel(&share.passphrase.view, None)
            .await
            .unwrap();
        assert!(!session.is_host);
        assert!(session.main_user.rtm.is_none());
        assert!(session.screen_share.rtm.is_none());

        let result = f.assembler.join_channel("", None).await;
        assert!(matches!(result, Err(BrokerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_join_fresh_token_no_fetch_and_stale_token_one_fetch() {
        let f = fixture(None, false);
        let share = f.assembler.create_channel("Standup", false, None).await.unwrap();
        assert_eq!(f.transcription.call_count(), 1);

        f.assembler
            .join_channel(&share.passphrase.view, None)
            .await
            .unwrap();
        assert_eq!(f.transcription.call_count(), 1);

        f.repo.set_transcription_token(
            &share.channel,
            Some("old"),
            60.0,
            Utc::now() - chrono::Duration::hours(1),
        );
        let session = f
            .assembler
            .join_channel(&share.passphrase.view, None)
            .await
            .unwrap();
        assert_eq!(f.transcription.call_count(), 2);
        assert_eq!(session.main_user.transcription_token.as_deref(), Some("symbl"));
    }

    #[tokio::test]
    async fn test_share_hides_host_passphrase_from_viewer() {
        let f = fixture(Some("+1 800 555 0100"), false);
        let created = f.assembler.create_channel("Standup", true, None).await.unwrap();

        let as_viewer = f.assembler.share(&created.passphrase.view).await.unwrap();
        assert!(as_viewer.passphrase.host.is_none());
        assert_eq!(as_viewer.pstn, created.pstn);

        let host_passphrase = created.passphrase.host.clone().unwrap();
        let first = f.assembler.share(&host_passphrase).await.unwrap();
        let second = f.assembler.share(&host_passphrase).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, created);
    }
}
