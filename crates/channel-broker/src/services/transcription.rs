//! Transcription provider token client and per-channel token cache.
//!
//! The provider hands out short-lived application tokens. Each channel
//! caches one token together with its lifetime; the cache refreshes it
//! lazily when a participant joins after it has expired.
//!
//! # Security
//!
//! - The application secret is a `SecretString` and is only exposed when
//!   serializing the exchange request
//! - Tokens are never logged
//! - Refresh failures are absorbed: participants get the stale token

use crate::config::TranscriptionConfig;
use crate::errors::BrokerError;
use crate::models::{ChannelRow, TranscriptionGrant};
use crate::observability::metrics;
use crate::repositories::ChannelsRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Default timeout for provider requests in seconds.
const TRANSCRIPTION_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout in seconds.
const TRANSCRIPTION_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Token exchange request body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenGenerateRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    app_id: &'a str,
    app_secret: &'a str,
}

/// Token exchange response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenGenerateResponse {
    access_token: String,
    expires_in: f64,
}

/// Fetches application tokens from the transcription provider.
#[async_trait]
pub trait TranscriptionClientTrait: Send + Sync {
    /// Exchange the application credentials for a token.
    ///
    /// Returns the token and its lifetime in seconds.
    async fn fetch_token(&self) -> Result<TranscriptionGrant, BrokerError>;
}

/// HTTP client for the transcription provider.
#[derive(Clone)]
pub struct TranscriptionClient {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: SecretString,
}

impl TranscriptionClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &TranscriptionConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TRANSCRIPTION_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(TRANSCRIPTION_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "broker.services.transcription", error = %e, "Failed to build HTTP client");
                BrokerError::Internal
            })?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
        })
    }
}

#[async_trait]
impl TranscriptionClientTrait for TranscriptionClient {
    #[instrument(skip_all, name = "broker.services.transcription.fetch_token")]
    async fn fetch_token(&self) -> Result<TranscriptionGrant, BrokerError> {
        let url = format!("{}/oauth2/token:generate", self.base_url);

        let body = TokenGenerateRequest {
            kind: "application",
            app_id: &self.app_id,
            app_secret: self.app_secret.expose_secret(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "broker.services.transcription", error = %e, "Transcription provider request failed");
                BrokerError::Upstream(format!("transcription token request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "broker.services.transcription", status = %status, "Transcription provider returned error status");
            return Err(BrokerError::Upstream(format!(
                "transcription token request returned {status}"
            )));
        }

        let parsed: TokenGenerateResponse = response.json().await.map_err(|e| {
            warn!(target: "broker.services.transcription", error = %e, "Failed to parse transcription token response");
            BrokerError::Upstream(format!("malformed transcription token response: {e}"))
        })?;

        Ok(TranscriptionGrant {
            token: Some(parsed.access_token),
            expires_in: parsed.expires_in,
        })
    }
}

/// Whether a channel's cached token must be refreshed at `now`.
pub fn is_stale(channel: &ChannelRow, now: DateTime<Utc>) -> bool {
    if channel.transcription_token.is_none() {
        return true;
    }

    let elapsed = now.signed_duration_since(channel.transcription_fetched_at);
    #[allow(clippy::cast_precision_loss)]
    let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
    elapsed_secs > channel.transcription_expires_in
}

/// Per-channel transcription token cache.
#[derive(Clone)]
pub struct TranscriptionTokenCache {
    client: Arc<dyn TranscriptionClientTrait>,
    channels: Arc<dyn ChannelsRepository>,
}

impl TranscriptionTokenCache {
    pub fn new(
        client: Arc<dyn TranscriptionClientTrait>,
        channels: Arc<dyn ChannelsRepository>,
    ) -> Self {
        Self { client, channels }
    }

    /// Token for a channel being created.
    ///
    /// A failed fetch is logged and yields an empty grant; the token is then
    /// fetched on the first join.
    pub async fn initial_token(&self) -> TranscriptionGrant {
        match self.client.fetch_token().await {
            Ok(grant) => {
                metrics::record_transcription_refresh("initial", "success");
                grant
            }
            Err(e) => {
                metrics::record_transcription_refresh("initial", "error");
                warn!(target: "broker.services.transcription", error = %e, "Initial transcription token fetch failed, creating channel without token");
                TranscriptionGrant {
                    token: None,
                    expires_in: 0.0,
                }
            }
        }
    }

    /// Current token for `channel`, refreshing it if stale.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Database` / `BrokerError::NotFound` if the
    /// refreshed token cannot be stored. Provider failures are not errors.
    #[instrument(skip_all, name = "broker.services.ensure_transcription_token", fields(channel_id = %channel.channel_id))]
    pub async fn ensure_token(&self, channel: &ChannelRow) -> Result<TranscriptionGrant, BrokerError> {
        let now = Utc::now();
        if !is_stale(channel, now) {
            return Ok(TranscriptionGrant::from_channel(channel));
        }

        let fresh = match self.client.fetch_token().await {
            Ok(grant) => grant,
            Err(e) => {
                metrics::record_transcription_refresh("stale", "error");
                warn!(target: "broker.services.transcription", error = %e, "Transcription token refresh failed, returning cached token");
                return Ok(TranscriptionGrant::from_channel(channel));
            }
        };
        metrics::record_transcription_refresh("stale", "success");

        self.channels
            .update_transcription_token(
                channel.channel_id,
                channel.transcription_token.as_deref(),
                &fresh,
                now,
            )
            .await
    }
}

/// Mock transcription client for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock transcription client that counts calls.
    pub struct MockTranscriptionClient {
        grant: Option<TranscriptionGrant>,
        call_count: AtomicUsize,
    }

    impl MockTranscriptionClient {
        /// A mock that always returns `token` with lifetime `expires_in`.
        pub fn returning(token: &str, expires_in: f64) -> Self {
            Self {
                grant: Some(TranscriptionGrant {
                    token: Some(token.to_string()),
                    expires_in,
                }),
                call_count: AtomicUsize::new(0),
            }
        }

        /// A mock whose every call fails.
        pub fn failing() -> Self {
            Self {
                grant: None,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranscriptionClientTrait for MockTranscriptionClient {
        async fn fetch_token(&self) -> Result<TranscriptionGrant, BrokerError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.grant
                .clone()
                .ok_or_else(|| BrokerError::Upstream("mock transcription failure".to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockTranscriptionClient;
    use super::*;
    use crate::repositories::InMemoryChannelsRepository;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(token: Option<&str>, expires_in: f64, fetched_at: DateTime<Utc>) -> ChannelRow {
        ChannelRow {
            channel_id: Uuid::new_v4(),
            name: "chan".to_string(),
            title: "Title".to_string(),
            host_passphrase: "host".to_string(),
            viewer_passphrase: "view".to_string(),
            secret: "secret".to_string(),
            dtmf: None,
            transcription_token: token.map(str::to_string),
            transcription_expires_in: expires_in,
            transcription_fetched_at: fetched_at,
            created_at: fetched_at,
        }
    }

    async fn cache_with(
        client: Arc<MockTranscriptionClient>,
        row: &ChannelRow,
    ) -> (TranscriptionTokenCache, Arc<InMemoryChannelsRepository>) {
        let repo = Arc::new(InMemoryChannelsRepository::new());
        repo.insert_channel(row).await.unwrap();
        (TranscriptionTokenCache::new(client, repo.clone()), repo)
    }

    fn config(base_url: String) -> TranscriptionConfig {
        TranscriptionConfig {
            api_url: base_url,
            app_id: "symbl-app".to_string(),
            app_secret: SecretString::from("symbl-secret"),
        }
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        assert!(is_stale(&channel(None, 3600.0, now), now));
        assert!(!is_stale(&channel(Some("t"), 3600.0, now), now));
        assert!(is_stale(
            &channel(Some("t"), 60.0, now - chrono::Duration::seconds(61)),
            now
        ));
        assert!(!is_stale(
            &channel(Some("t"), 60.0, now - chrono::Duration::seconds(59)),
            now
        ));
    }

    #[tokio::test]
    async fn test_fresh_token_makes_no_call() {
        let client = Arc::new(MockTranscriptionClient::returning("new", 3600.0));
        let row = channel(Some("cached"), 3600.0, Utc::now());
        let (cache, _) = cache_with(client.clone(), &row).await;

        let grant = cache.ensure_token(&row).await.unwrap();

        assert_eq!(grant.token.as_deref(), Some("cached"));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_token_fetched_once_and_persisted() {
        let client = Arc::new(MockTranscriptionClient::returning("new", 1800.0));
        let row = channel(Some("old"), 60.0, Utc::now() - chrono::Duration::hours(2));
        let (cache, repo) = cache_with(client.clone(), &row).await;

        let grant = cache.ensure_token(&row).await.unwrap();

        assert_eq!(grant.token.as_deref(), Some("new"));
        assert_eq!(grant.expires_in, 1800.0);
        assert_eq!(client.call_count(), 1);

        let stored = repo.channel_by_name("chan").unwrap();
        assert_eq!(stored.transcription_token.as_deref(), Some("new"));
        assert_eq!(stored.transcription_expires_in, 1800.0);
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_stale_pair() {
        let client = Arc::new(MockTranscriptionClient::failing());
        let row = channel(Some("old"), 60.0, Utc::now() - chrono::Duration::hours(2));
        let (cache, repo) = cache_with(client.clone(), &row).await;

        let grant = cache.ensure_token(&row).await.unwrap();

        assert_eq!(grant.token.as_deref(), Some("old"));
        assert_eq!(grant.expires_in, 60.0);
        assert_eq!(client.call_count(), 1);
        assert_eq!(
            repo.channel_by_name("chan").unwrap().transcription_token.as_deref(),
            Some("old")
        );
    }

    #[tokio::test]
    async fn test_concurrent_refresh_returns_winner() {
        let client = Arc::new(MockTranscriptionClient::returning("mine", 1800.0));
        let row = channel(Some("old"), 60.0, Utc::now() - chrono::Duration::hours(2));
        let (cache, repo) = cache_with(client.clone(), &row).await;

        let winner = TranscriptionGrant {
            token: Some("theirs".to_string()),
            expires_in: 900.0,
        };
        repo.preempt_next_token_update(winner.clone());

        let grant = cache.ensure_token(&row).await.unwrap();

        assert_eq!(grant, winner);
        let stored = repo.channel_by_name("chan").unwrap();
        assert_eq!(stored.transcription_token.as_deref(), Some("theirs"));
        assert_eq!(stored.transcription_expires_in, 900.0);
    }

    #[tokio::test]
    async fn test_initial_token_failure_yields_empty_grant() {
        let cache = TranscriptionTokenCache::new(
            Arc::new(MockTranscriptionClient::failing()),
            Arc::new(InMemoryChannelsRepository::new()),
        );

        let grant = cache.initial_token().await;
        assert!(grant.token.is_none());
    }

    #[tokio::test]
    async fn test_http_client_exchanges_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token:generate"))
            .and(body_json(serde_json::json!({
                "type": "application",
                "appId": "symbl-app",
                "appSecret": "symbl-secret"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "provider-token",
                "expiresIn": 86400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(&config(server.uri())).unwrap();
        let grant = client.fetch_token().await.unwrap();

        assert_eq!(grant.token.as_deref(), Some("provider-token"));
        assert_eq!(grant.expires_in, 86400.0);
    }

    #[tokio::test]
    async fn test_http_client_error_status_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token:generate"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(&config(server.uri())).unwrap();
        let result = client.fetch_token().await;

        assert!(matches!(result, Err(BrokerError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_http_client_malformed_body_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token:generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "wrong-shape"
            })))
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(&config(server.uri())).unwrap();
        let result = client.fetch_token().await;

        assert!(matches!(result, Err(BrokerError::Upstream(_))));
    }
}
