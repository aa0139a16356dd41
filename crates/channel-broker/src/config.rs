//! Channel Broker configuration.
//!
//! Configuration is loaded once from environment variables at startup and
//! handed to each component as the sub-struct it needs. All sensitive
//! fields are `SecretString` or redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default cloud recording API base URL.
pub const DEFAULT_RECORDING_API_URL: &str = "https://api.agora.io";

/// Default transcription provider API base URL.
pub const DEFAULT_TRANSCRIPTION_API_URL: &str = "https://api.symbl.ai";

/// Credentials used to sign RTC/RTM tokens.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// Application id (token issuer).
    pub app_id: String,

    /// Application certificate (token signing key).
    pub app_certificate: SecretString,
}

/// Storage target handed to the recording service.
#[derive(Debug, Clone)]
pub struct RecordingStorageConfig {
    /// Storage vendor code.
    pub vendor: i32,

    /// Storage region code.
    pub region: i32,

    /// Bucket name.
    pub bucket: String,

    /// Bucket access key.
    pub access_key: SecretString,

    /// Bucket secret key.
    pub secret_key: SecretString,
}

/// Cloud recording service access.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Base URL of the recording REST API.
    pub api_url: String,

    /// Application id the recordings are scoped to.
    pub app_id: String,

    /// Customer id for HTTP basic auth.
    pub customer_id: String,

    /// Customer certificate for HTTP basic auth.
    pub customer_certificate: SecretString,

    /// Where finished recordings are written.
    pub storage: RecordingStorageConfig,
}

/// Transcription provider access.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Base URL of the transcription provider API.
    pub api_url: String,

    /// Application id for the credential exchange.
    pub app_id: String,

    /// Application secret for the credential exchange.
    pub app_secret: SecretString,
}

/// Channel Broker configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Whether user accounts (and RTM tokens) are enabled.
    pub enable_oauth: bool,

    /// PSTN dial-in number shared with channels that request PSTN.
    pub pstn_number: Option<String>,

    /// Media token signing.
    pub credentials: CredentialConfig,

    /// Cloud recording access.
    pub recording: RecordingConfig,

    /// Transcription provider access.
    pub transcription: TranscriptionConfig,
}

/// Custom Debug implementation that redacts the database URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("enable_oauth", &self.enable_oauth)
            .field("pstn_number", &self.pstn_number)
            .field("credentials", &self.credentials)
            .field("recording", &self.recording)
            .field("transcription", &self.transcription)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),

    #[error("Invalid recording storage configuration: {0}")]
    InvalidRecordingStorage(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let enable_oauth = match vars.get("ENABLE_OAUTH") {
            Some(value) => parse_bool("ENABLE_OAUTH", value)?,
            None => false,
        };

        let pstn_number = vars
            .get("PSTN_NUMBER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let app_id = required(vars, "APP_ID")?;

        let credentials = CredentialConfig {
            app_id: app_id.clone(),
            app_certificate: SecretString::from(required(vars, "APP_CERTIFICATE")?),
        };

        let storage = RecordingStorageConfig {
            vendor: parse_code(vars, "RECORDING_VENDOR")?,
            region: parse_code(vars, "RECORDING_REGION")?,
            bucket: optional(vars, "BUCKET_NAME"),
            access_key: SecretString::from(optional(vars, "BUCKET_ACCESS_KEY")),
            secret_key: SecretString::from(optional(vars, "BUCKET_ACCESS_SECRET")),
        };

        let recording = RecordingConfig {
            api_url: vars
                .get("RECORDING_API_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_RECORDING_API_URL.to_string()),
            app_id,
            customer_id: required(vars, "CUSTOMER_ID")?,
            customer_certificate: SecretString::from(required(vars, "CUSTOMER_CERTIFICATE")?),
            storage,
        };

        let transcription = TranscriptionConfig {
            api_url: vars
                .get("TRANSCRIPTION_API_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_API_URL.to_string()),
            app_id: required(vars, "SYMBL_APPID")?,
            app_secret: SecretString::from(required(vars, "SYMBL_SECRET")?),
        };

        Ok(Config {
            database_url,
            bind_address,
            enable_oauth,
            pstn_number,
            credentials,
            recording,
            transcription,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional(vars: &HashMap<String, String>, name: &str) -> String {
    vars.get(name).cloned().unwrap_or_default()
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::InvalidBool(format!(
            "{} must be true or false, got '{}'",
            name, other
        ))),
    }
}

fn parse_code(vars: &HashMap<String, String>, name: &str) -> Result<i32, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(0);
    };

    let value: i32 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidRecordingStorage(format!(
            "{} must be a valid integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value < 0 {
        return Err(ConfigError::InvalidRecordingStorage(format!(
            "{} must not be negative, got {}",
            name, value
        )));
    }

    Ok(value)
}
