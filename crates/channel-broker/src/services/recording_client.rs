//! Cloud recording REST client.
//!
//! The recording service works in three calls: `acquire` reserves a
//! recording resource (RID), `start` launches a recorder on it (SID), and
//! `stop` ends the session. Each call takes an explicit request value;
//! the client keeps no per-recording state.
//!
//! # Security
//!
//! - Requests authenticate with HTTP basic auth (customer id/certificate)
//! - Bucket keys and the decryption secret are `SecretString`s, exposed only
//!   while serializing the request body
//! - Response bodies are never logged

use crate::config::{RecordingConfig, RecordingStorageConfig};
use crate::errors::BrokerError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::{is_blank, ExposeSecret, SecretString};
use reqwest::Client;
use serde::{Deserialize, Serialize, Serializer};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, instrument, warn};

/// Default timeout for recording API requests in seconds.
const RECORDING_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout in seconds.
const RECORDING_CONNECT_TIMEOUT_SECS: u64 = 5;

/// How long an acquired resource stays reserved.
pub const RESOURCE_EXPIRED_HOURS: u32 = 24;

/// Errors from the recording service, one per call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("acquire failed: {0}")]
    Acquire(String),

    #[error("start failed: {0}")]
    Start(String),

    #[error("stop failed: {0}")]
    Stop(String),
}

impl From<RecordingError> for BrokerError {
    fn from(err: RecordingError) -> Self {
        BrokerError::Upstream(err.to_string())
    }
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

// ============================================================================
// Request Bodies
// ============================================================================

/// Body of the acquire call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireRequest {
    pub cname: String,
    /// Recording bot uid, sent as a decimal string.
    pub uid: String,
    pub client_request: AcquireClientRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireClientRequest {
    pub resource_expired_hour: u32,
}

impl AcquireRequest {
    pub fn new(channel_name: &str, uid: u32) -> Self {
        Self {
            cname: channel_name.to_string(),
            uid: uid.to_string(),
            client_request: AcquireClientRequest {
                resource_expired_hour: RESOURCE_EXPIRED_HOURS,
            },
        }
    }
}

/// Body of the start call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub cname: String,
    pub uid: String,
    pub client_request: StartClientRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartClientRequest {
    /// RTC token the recording bot joins with.
    pub token: String,
    pub recording_config: RecordingParameters,
    pub storage_config: StorageParameters,
}

/// Mixed-mode recording parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingParameters {
    pub max_idle_time: u32,
    pub stream_types: u32,
    pub channel_type: u32,
    /// Present only for encrypted channels.
    #[serde(flatten)]
    pub decryption: Option<Decryption>,
    pub transcoding_config: TranscodingParameters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decryption {
    pub decryption_mode: u32,
    #[serde(serialize_with = "serialize_secret")]
    pub secret: SecretString,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingParameters {
    pub height: u32,
    pub width: u32,
    pub bitrate: u32,
    pub fps: u32,
    pub mixed_video_layout: u32,
    pub background_color: String,
}

impl Default for TranscodingParameters {
    fn default() -> Self {
        Self {
            height: 720,
            width: 1280,
            bitrate: 2260,
            fps: 15,
            mixed_video_layout: 1,
            background_color: "#000000".to_string(),
        }
    }
}

/// Where the recorder writes its output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageParameters {
    pub vendor: i32,
    pub region: i32,
    pub bucket: String,
    #[serde(serialize_with = "serialize_secret")]
    pub access_key: SecretString,
    #[serde(serialize_with = "serialize_secret")]
    pub secret_key: SecretString,
    /// `[channel name, start unix time]`
    pub file_name_prefix: Vec<String>,
}

impl StartRequest {
    /// Build a start request.
    ///
    /// `decryption_secret` enables decryption mode when non-blank.
    pub fn new(
        channel_name: &str,
        uid: u32,
        token: String,
        storage: &RecordingStorageConfig,
        decryption_secret: Option<&SecretString>,
        started_at_unix: i64,
    ) -> Self {
        let decryption = decryption_secret
            .filter(|secret| !is_blank(secret))
            .map(|secret| Decryption {
                decryption_mode: 1,
                secret: secret.clone(),
            });

        Self {
            cname: channel_name.to_string(),
            uid: uid.to_string(),
            client_request: StartClientRequest {
                token,
                recording_config: RecordingParameters {
                    max_idle_time: 30,
                    stream_types: 2,
                    channel_type: 1,
                    decryption,
                    transcoding_config: TranscodingParameters::default(),
                },
                storage_config: StorageParameters {
                    vendor: storage.vendor,
                    region: storage.region,
                    bucket: storage.bucket.clone(),
                    access_key: storage.access_key.clone(),
                    secret_key: storage.secret_key.clone(),
                    file_name_prefix: vec![channel_name.to_string(), started_at_unix.to_string()],
                },
            },
        }
    }
}

/// Body of the stop call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub cname: String,
    pub uid: String,
    pub client_request: EmptyClientRequest,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyClientRequest {}

impl StopRequest {
    pub fn new(channel_name: &str, uid: u32) -> Self {
        Self {
            cname: channel_name.to_string(),
            uid: uid.to_string(),
            client_request: EmptyClientRequest {},
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcquireResponse {
    resource_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    sid: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Cloud recording operations.
#[async_trait]
pub trait RecordingClientTrait: Send + Sync {
    /// Reserve a recording resource. Returns the resource id.
    async fn acquire(&self, request: &AcquireRequest) -> Result<String, RecordingError>;

    /// Start recording on an acquired resource. Returns the session id.
    async fn start(&self, resource_id: &str, request: &StartRequest)
        -> Result<String, RecordingError>;

    /// Stop a recording session.
    async fn stop(
        &self,
        resource_id: &str,
        session_id: &str,
        request: &StopRequest,
    ) -> Result<(), RecordingError>;
}

/// HTTP client for the cloud recording REST API.
#[derive(Clone)]
pub struct RecordingClient {
    client: Client,
    base_url: String,
    customer_id: String,
    customer_certificate: SecretString,
}

impl RecordingClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &RecordingConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(RECORDING_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(RECORDING_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "broker.services.recording_client", error = %e, "Failed to build HTTP client");
                BrokerError::Internal
            })?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/v1/apps/{}/cloud_recording",
                config.api_url.trim_end_matches('/'),
                config.app_id
            ),
            customer_id: config.customer_id.clone(),
            customer_certificate: config.customer_certificate.clone(),
        })
    }

    /// POST `body` to `url` and return the response on 2xx.
    ///
    /// The error string describes the failure for the caller's variant.
    async fn post<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, String> {
        let start = Instant::now();

        let result = self
            .client
            .post(url)
            .basic_auth(
                &self.customer_id,
                Some(self.customer_certificate.expose_secret()),
            )
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_recording_call(operation, "error", start.elapsed());
                warn!(target: "broker.services.recording_client", operation = operation, error = %e, "Recording request failed");
                return Err(format!("request failed: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            metrics::record_recording_call(operation, "error", start.elapsed());
            warn!(target: "broker.services.recording_client", operation = operation, status = %status, "Recording service returned error status");
            return Err(format!("returned {status}"));
        }

        metrics::record_recording_call(operation, "success", start.elapsed());
        Ok(response)
    }
}

#[async_trait]
impl RecordingClientTrait for RecordingClient {
    #[instrument(skip_all, name = "broker.services.recording_client.acquire")]
    async fn acquire(&self, request: &AcquireRequest) -> Result<String, RecordingError> {
        let url = format!("{}/acquire", self.base_url);

        let response = self
            .post("acquire", &url, request)
            .await
            .map_err(RecordingError::Acquire)?;

        let parsed: AcquireResponse = response
            .json()
            .await
            .map_err(|e| RecordingError::Acquire(format!("malformed response: {e}")))?;

        parsed
            .resource_id
            .filter(|rid| !rid.is_empty())
            .ok_or_else(|| RecordingError::Acquire("response missing resourceId".to_string()))
    }

    #[instrument(skip_all, name = "broker.services.recording_client.start")]
    async fn start(
        &self,
        resource_id: &str,
        request: &StartRequest,
    ) -> Result<String, RecordingError> {
        let url = format!("{}/resourceid/{}/mode/mix/start", self.base_url, resource_id);

        let response = self
            .post("start", &url, request)
            .await
            .map_err(RecordingError::Start)?;

        let parsed: StartResponse = response
            .json()
            .await
            .map_err(|e| RecordingError::Start(format!("malformed response: {e}")))?;

        parsed
            .sid
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| RecordingError::Start("response missing sid".to_string()))
    }

    #[instrument(skip_all, name = "broker.services.recording_client.stop")]
    async fn stop(
        &self,
        resource_id: &str,
        session_id: &str,
        request: &StopRequest,
    ) -> Result<(), RecordingError> {
        let url = format!(
            "{}/resourceid/{}/sid/{}/mode/mix/stop",
            self.base_url, resource_id, session_id
        );

        self.post("stop", &url, request)
            .await
            .map(|_| ())
            .map_err(RecordingError::Stop)
    }
}

/// Mock recording client for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Which call a mock should fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailAt {
        Acquire,
        Start,
        Stop,
    }

    /// Mock recording client with per-call counters.
    pub struct MockRecordingClient {
        fail_at: Option<FailAt>,
        acquire_calls: AtomicUsize,
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        last_start_body: Mutex<Option<serde_json::Value>>,
    }

    impl MockRecordingClient {
        /// A mock whose calls all succeed.
        pub fn succeeding() -> Self {
            Self::build(None)
        }

        /// A mock that fails the given call.
        pub fn failing_at(step: FailAt) -> Self {
            Self::build(Some(step))
        }

        fn build(fail_at: Option<FailAt>) -> Self {
            Self {
                fail_at,
                acquire_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                last_start_body: Mutex::new(None),
            }
        }

        pub fn acquire_calls(&self) -> usize {
            self.acquire_calls.load(Ordering::SeqCst)
        }

        pub fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        pub fn stop_calls(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }

        /// Total calls of any kind.
        pub fn call_count(&self) -> usize {
            self.acquire_calls() + self.start_calls() + self.stop_calls()
        }

        /// The serialized body of the most recent start call.
        pub fn last_start_body(&self) -> Option<serde_json::Value> {
            self.last_start_body
                .lock()
                .map(|body| body.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl RecordingClientTrait for MockRecordingClient {
        async fn acquire(&self, request: &AcquireRequest) -> Result<String, RecordingError> {
            let n = self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(FailAt::Acquire) {
                return Err(RecordingError::Acquire("mock acquire failure".to_string()));
            }
            Ok(format!("rid-{}-{}", request.cname, n + 1))
        }

        async fn start(
            &self,
            resource_id: &str,
            request: &StartRequest,
        ) -> Result<String, RecordingError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut body) = self.last_start_body.lock() {
                *body = serde_json::to_value(request).ok();
            }
            if self.fail_at == Some(FailAt::Start) {
                return Err(RecordingError::Start("mock start failure".to_string()));
            }
            Ok(format!("sid-for-{resource_id}"))
        }

        async fn stop(
            &self,
            _resource_id: &str,
            _session_id: &str,
            _request: &StopRequest,
        ) -> Result<(), RecordingError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(FailAt::Stop) {
                return Err(RecordingError::Stop("mock stop failure".to_string()));
            }
            Ok(())
        }
    }
}
