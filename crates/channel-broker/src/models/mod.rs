//! Channel Broker models.
//!
//! Contains the stored rows, request bodies and response payloads used
//! across the service.

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum channel title length, in characters.
pub const MAX_TITLE_LENGTH: usize = 256;

/// Maximum account display-name length, in characters.
pub const MAX_NAME_LENGTH: usize = 128;

// ============================================================================
// Stored Rows
// ============================================================================

/// Channel database row.
#[derive(Debug, Clone)]
pub struct ChannelRow {
    /// Unique channel identifier.
    pub channel_id: Uuid,

    /// Generated channel name used on the media network.
    pub name: String,

    /// Human-readable title.
    pub title: String,

    /// Passphrase granting host access.
    pub host_passphrase: String,

    /// Passphrase granting viewer access.
    pub viewer_passphrase: String,

    /// Per-channel media secret.
    pub secret: String,

    /// PSTN dial-in code, present iff PSTN was requested.
    pub dtmf: Option<String>,

    /// Cached transcription token.
    pub transcription_token: Option<String>,

    /// Lifetime of the cached transcription token, in seconds.
    pub transcription_expires_in: f64,

    /// When the cached transcription token was obtained.
    pub transcription_fetched_at: DateTime<Utc>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Recording state persisted against a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingRow {
    /// Channel the recording belongs to.
    pub channel_id: Uuid,

    /// Participant uid the recording bot joined with.
    pub uid: u32,

    /// Resource id (RID) from acquire.
    pub resource_id: String,

    /// Session id (SID) from start.
    pub session_id: String,

    /// When start succeeded.
    pub started_at: DateTime<Utc>,
}

/// A recording resource the broker lost track of.
///
/// Either acquired but never started (`session_id` is `None`), or started
/// but never stored as the channel's recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanedResource {
    /// Channel name the resource was acquired for.
    pub channel_name: String,

    /// The acquired resource id.
    pub resource_id: String,

    /// Session id of a recording that is still running.
    pub session_id: Option<String>,

    /// Recording bot uid used for the acquire call.
    pub uid: u32,

    /// When the orphan was recorded.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Roles
// ============================================================================

/// Which passphrase a caller presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Presented the host passphrase.
    Host,

    /// Presented the viewer passphrase.
    Viewer,
}

impl ParticipantRole {
    /// Returns the string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Viewer => "viewer",
        }
    }

    /// Whether this role may control recording.
    pub fn is_host(&self) -> bool {
        matches!(self, ParticipantRole::Host)
    }
}

/// A channel resolved from a passphrase, tagged with the caller's role.
#[derive(Debug, Clone)]
pub struct ResolvedChannel {
    pub channel: ChannelRow,
    pub role: ParticipantRole,
}

/// Transcription token and its lifetime as handed to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionGrant {
    pub token: Option<String>,
    pub expires_in: f64,
}

impl TranscriptionGrant {
    /// The grant stored on a channel row.
    pub fn from_channel(channel: &ChannelRow) -> Self {
        Self {
            token: channel.transcription_token.clone(),
            expires_in: channel.transcription_expires_in,
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// Authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account identifier.
    pub email: String,

    /// Display name.
    pub name: String,
}

/// Request body for `PATCH /api/v1/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateNameRequest {
    pub name: String,
}

// ============================================================================
// Channel API Models
// ============================================================================

/// Request body for `POST /api/v1/channels`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannelRequest {
    /// Channel title (trimmed, 1..=256 characters).
    pub title: String,

    /// Whether to generate a PSTN dial-in code.
    #[serde(default)]
    pub enable_pstn: bool,
}

/// Request body carrying only a passphrase.
///
/// Passphrases travel in bodies so they never appear in access logs.
#[derive(Debug, Clone, Deserialize)]
pub struct PassphraseRequest {
    pub passphrase: String,
}

/// Request body for `POST /api/v1/recordings/start`.
#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    pub passphrase: String,

    /// Media decryption secret for encrypted channels.
    #[serde(default)]
    pub secret: Option<SecretString>,
}

/// PSTN dial-in details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pstn {
    pub number: String,
    pub dtmf: String,
}

/// Passphrases plus the channel's transcription grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passphrase {
    /// Host passphrase; `null` when shared with a viewer.
    pub host: Option<String>,

    /// Viewer passphrase.
    pub view: String,

    pub transcription_token: Option<String>,

    pub transcription_expires_in: f64,
}

/// Shareable description of a channel.
///
/// Returned by `POST /api/v1/channels` and `POST /api/v1/channels/share`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareResponse {
    pub passphrase: Passphrase,

    /// Channel name.
    pub channel: String,

    pub title: String,

    /// PSTN details; `null` when the channel has no DTMF code.
    pub pstn: Option<Pstn>,
}

/// Credentials for one participant connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCredentials {
    /// RTC token bound to `uid` and the channel.
    pub rtc: String,

    /// RTM token; `null` unless user accounts are enabled.
    pub rtm: Option<String>,

    pub transcription_token: Option<String>,

    pub transcription_expires_in: f64,

    /// Numeric participant uid.
    pub uid: u32,
}

/// Everything a client needs to enter a channel.
///
/// Returned by `POST /api/v1/channels/join`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub title: String,

    pub channel: String,

    pub is_host: bool,

    /// Per-channel media secret.
    pub secret: String,

    /// Credentials for the camera/microphone connection.
    pub main_user: UserCredentials,

    /// Credentials for the screen-share connection.
    pub screen_share: UserCredentials,
}

/// Response for the recording control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingActionResponse {
    pub result: String,
}

impl RecordingActionResponse {
    pub fn success() -> Self {
        Self {
            result: "success".to_string(),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Readiness check response.
///
/// Returned by the `/ready` endpoint (readiness probe).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// Service readiness status ("ready" or "not_ready").
    pub status: &'static str,

    /// Store connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,

    /// Error message (generic, no infrastructure details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
