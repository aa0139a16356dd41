//! Test server harness for E2E testing
//!
//! Provides `TestBrokerServer` for spawning real broker instances in tests.
//! Stores are in memory; the recording and transcription clients are the
//! real HTTP clients pointed at per-server wiremock instances.

use channel_broker::config::Config;
use channel_broker::models::User;
use channel_broker::observability::metrics::detached_metrics_handle;
use channel_broker::repositories::{InMemoryChannelsRepository, InMemoryUsersRepository};
use channel_broker::routes::{self, AppState};
use channel_broker::services::{RecordingClient, TranscriptionClient};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use wiremock::MockServer;

use crate::providers::TEST_APP_ID;

/// Options for [`TestBrokerServer::spawn_with`].
#[derive(Debug, Clone, Default)]
pub struct TestServerOptions {
    /// Sets `ENABLE_OAUTH`.
    pub enable_oauth: bool,
    /// Sets `PSTN_NUMBER`.
    pub pstn_number: Option<String>,
}

/// Test harness for spawning the Channel Broker in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<(), anyhow::Error> {
///     let server = TestBrokerServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestBrokerServer {
    addr: SocketAddr,
    config: Config,
    channels: Arc<InMemoryChannelsRepository>,
    users: Arc<InMemoryUsersRepository>,
    recording_api: MockServer,
    transcription_api: MockServer,
    _handle: JoinHandle<()>,
}

impl TestBrokerServer {
    /// Spawn a server with accounts disabled and no PSTN number.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawn a new test server instance.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    ///
    /// No provider stubs are mounted; unmatched provider requests get 404.
    pub async fn spawn_with(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let recording_api = MockServer::start().await;
        let transcription_api = MockServer::start().await;

        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("ENABLE_OAUTH".to_string(), options.enable_oauth.to_string()),
            ("APP_ID".to_string(), TEST_APP_ID.to_string()),
            (
                "APP_CERTIFICATE".to_string(),
                "test-app-certificate".to_string(),
            ),
            ("CUSTOMER_ID".to_string(), "test-customer".to_string()),
            (
                "CUSTOMER_CERTIFICATE".to_string(),
                "test-customer-certificate".to_string(),
            ),
            ("RECORDING_API_URL".to_string(), recording_api.uri()),
            ("RECORDING_VENDOR".to_string(), "1".to_string()),
            ("BUCKET_NAME".to_string(), "test-bucket".to_string()),
            ("BUCKET_ACCESS_KEY".to_string(), "test-access".to_string()),
            ("BUCKET_ACCESS_SECRET".to_string(), "test-secret".to_string()),
            ("SYMBL_APPID".to_string(), "test-symbl-app".to_string()),
            ("SYMBL_SECRET".to_string(), "test-symbl-secret".to_string()),
            ("TRANSCRIPTION_API_URL".to_string(), transcription_api.uri()),
        ]);
        if let Some(number) = options.pstn_number {
            vars.insert("PSTN_NUMBER".to_string(), number);
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let recording_client = RecordingClient::new(&config.recording)
            .map_err(|e| anyhow::anyhow!("Failed to build recording client: {}", e))?;
        let transcription_client = TranscriptionClient::new(&config.transcription)
            .map_err(|e| anyhow::anyhow!("Failed to build transcription client: {}", e))?;

        let channels = Arc::new(InMemoryChannelsRepository::new());
        let users = Arc::new(InMemoryUsersRepository::new());

        let state = Arc::new(AppState::new(
            config.clone(),
            channels.clone(),
            users.clone(),
            Arc::new(recording_client),
            Arc::new(transcription_client),
        ));

        // Tests run many servers in one process; keep the recorder local
        let metrics_handle =
            detached_metrics_handle().map_err(|e| anyhow::anyhow!("Failed to build metrics: {}", e))?;

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            channels,
            users,
            recording_api,
            transcription_api,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The in-memory channel store behind the server.
    pub fn channels(&self) -> &InMemoryChannelsRepository {
        &self.channels
    }

    /// The in-memory account store behind the server.
    pub fn users(&self) -> &InMemoryUsersRepository {
        &self.users
    }

    /// Stub standing in for the cloud recording API.
    pub fn recording_api(&self) -> &MockServer {
        &self.recording_api
    }

    /// Stub standing in for the transcription provider.
    pub fn transcription_api(&self) -> &MockServer {
        &self.transcription_api
    }

    /// Create an account with one session token.
    pub fn seed_account(&self, email: &str, name: &str, token_id: &str) {
        self.users.insert_user(User {
            email: email.to_string(),
            name: name.to_string(),
        });
        self.users.insert_token(email, token_id);
    }
}

impl Drop for TestBrokerServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestBrokerServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_points_clients_at_stubs() -> Result<(), anyhow::Error> {
        let server = TestBrokerServer::spawn().await?;

        assert_eq!(server.config().recording.api_url, server.recording_api().uri());
        assert_eq!(
            server.config().transcription.api_url,
            server.transcription_api().uri()
        );
        assert!(!server.config().enable_oauth);

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestBrokerServer::spawn().await?;
        let server2 = TestBrokerServer::spawn().await?;

        assert_ne!(server1.addr(), server2.addr());

        Ok(())
    }
}
