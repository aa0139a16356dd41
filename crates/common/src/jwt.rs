//! Signed media access tokens shared across Channel Broker crates.
//!
//! Two token kinds are issued to participants:
//! - RTC tokens authorize one numeric participant id to join one channel
//!   with a publisher or subscriber role.
//! - RTM tokens authorize an account identifier on the messaging service.
//!
//! Both are HS256 JWTs signed with the application certificate and carry
//! the application id as issuer.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted on verification
//! - The RTM `sub` (an account identifier) is redacted in Debug output

use crate::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed token size in bytes (8KB), checked before decoding.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Fixed validity window for media tokens (24 hours).
pub const MEDIA_TOKEN_TTL: Duration = Duration::from_secs(86_400);

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while signing or verifying media tokens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaTokenError {
    /// Signing failed (bad key material or unserializable claims).
    #[error("Failed to sign media token: {0}")]
    Signing(String),

    /// Token exceeded [`MAX_JWT_SIZE_BYTES`].
    #[error("The media token is invalid or expired")]
    TokenTooLarge,

    /// Signature, issuer or expiry check failed.
    #[error("The media token is invalid or expired")]
    Invalid,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Media permission granted by an RTC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtcRole {
    /// May publish audio, video and data streams.
    Publisher,
    /// May only subscribe to other participants' streams.
    Subscriber,
}

/// Claims carried by an RTC token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcClaims {
    /// Application id.
    pub iss: String,
    /// Participant uid, as a string.
    pub sub: String,
    /// Channel the token is bound to.
    pub channel: String,
    /// Numeric participant uid.
    pub uid: u32,
    /// Granted media permission.
    pub role: RtcRole,
    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

/// Claims carried by an RTM token.
#[derive(Clone, Serialize, Deserialize)]
pub struct RtmClaims {
    /// Application id.
    pub iss: String,
    /// Account identifier - redacted in Debug output.
    pub sub: String,
    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

impl fmt::Debug for RtmClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtmClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Signs and verifies media tokens for one application.
#[derive(Clone)]
pub struct MediaTokenSigner {
    app_id: String,
    app_certificate: SecretString,
    ttl: Duration,
}

impl fmt::Debug for MediaTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTokenSigner")
            .field("app_id", &self.app_id)
            .field("app_certificate", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl MediaTokenSigner {
    /// Create a signer with the fixed [`MEDIA_TOKEN_TTL`] validity window.
    #[must_use]
    pub fn new(app_id: String, app_certificate: SecretString) -> Self {
        Self {
            app_id,
            app_certificate,
            ttl: MEDIA_TOKEN_TTL,
        }
    }

    /// Sign an RTC token for `uid` in `channel`, issued at `now` (epoch seconds).
    ///
    /// # Errors
    ///
    /// Returns `MediaTokenError::Signing` if encoding fails.
    pub fn sign_rtc(
        &self,
        channel: &str,
        uid: u32,
        role: RtcRole,
        now: i64,
    ) -> Result<String, MediaTokenError> {
        let claims = RtcClaims {
            iss: self.app_id.clone(),
            sub: uid.to_string(),
            channel: channel.to_string(),
            uid,
            role,
            iat: now,
            exp: now + self.ttl_secs(),
        };
        self.sign(&claims)
    }

    /// Sign an RTM token for `account`, issued at `now` (epoch seconds).
    ///
    /// # Errors
    ///
    /// Returns `MediaTokenError::Signing` if encoding fails.
    pub fn sign_rtm(&self, account: &str, now: i64) -> Result<String, MediaTokenError> {
        let claims = RtmClaims {
            iss: self.app_id.clone(),
            sub: account.to_string(),
            iat: now,
            exp: now + self.ttl_secs(),
        };
        self.sign(&claims)
    }

    /// Verify an RTC token's signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// Returns `MediaTokenError::TokenTooLarge` or `MediaTokenError::Invalid`.
    pub fn verify_rtc(&self, token: &str) -> Result<RtcClaims, MediaTokenError> {
        self.verify(token)
    }

    /// Verify an RTM token's signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// Returns `MediaTokenError::TokenTooLarge` or `MediaTokenError::Invalid`.
    pub fn verify_rtm(&self, token: &str) -> Result<RtmClaims, MediaTokenError> {
        self.verify(token)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs() as i64
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, MediaTokenError> {
        let key = EncodingKey::from_secret(self.app_certificate.expose_secret().as_bytes());
        encode(&Header::new(Algorithm::HS256), claims, &key)
            .map_err(|e| MediaTokenError::Signing(e.to_string()))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, MediaTokenError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(target: "common.jwt", size = token.len(), "Media token too large");
            return Err(MediaTokenError::TokenTooLarge);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.app_id.as_str()]);

        let key = DecodingKey::from_secret(self.app_certificate.expose_secret().as_bytes());
        decode::<T>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(target: "common.jwt", error = %e, "Media token verification failed");
                MediaTokenError::Invalid
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    const NOW: i64 = 4_000_000_000;

    fn signer() -> MediaTokenSigner {
        MediaTokenSigner::new("app-123".to_string(), SecretString::from("cert-abc"))
    }

    #[test]
    fn test_rtc_token_round_trips_claims() {
        let signer = signer();
        let token = signer
            .sign_rtc("chan", 42, RtcRole::Publisher, NOW)
            .unwrap();

        let claims = signer.verify_rtc(&token).unwrap();
        assert_eq!(claims.iss, "app-123");
        assert_eq!(claims.channel, "chan");
        assert_eq!(claims.uid, 42);
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role, RtcRole::Publisher);
        assert_eq!(claims.exp - claims.iat, 86_400);
    }

    #[test]
    fn test_rtm_token_binds_account() {
        let signer = signer();
        let token = signer.sign_rtm("alice@example.com", NOW).unwrap();

        let claims = signer.verify_rtm(&token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");
    }

    #[test]
    fn test_rtm_claims_debug_redacts_account() {
        let claims = RtmClaims {
            iss: "app".to_string(),
            sub: "alice@example.com".to_string(),
            iat: 1,
            exp: 2,
        };
        let debug_str = format!("{claims:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("alice"));
    }

    #[test]
    fn test_token_header_is_hs256() {
        let token = signer()
            .sign_rtc("chan", 1, RtcRole::Subscriber, NOW)
            .unwrap();
        let header = token.split('.').next().unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(header).unwrap();
        let header_json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(header_json["alg"], "HS256");
    }

    #[test]
    fn test_wrong_certificate_rejected() {
        let token = signer()
            .sign_rtc("chan", 7, RtcRole::Publisher, NOW)
            .unwrap();
        let other = MediaTokenSigner::new("app-123".to_string(), SecretString::from("other"));
        assert_eq!(other.verify_rtc(&token), Err(MediaTokenError::Invalid));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let token = signer()
            .sign_rtc("chan", 7, RtcRole::Publisher, NOW)
            .unwrap();
        let other = MediaTokenSigner::new("app-999".to_string(), SecretString::from("cert-abc"));
        assert_eq!(other.verify_rtc(&token), Err(MediaTokenError::Invalid));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Issued long before now, so well past the validity window
        let signer = signer();
        let token = signer
            .sign_rtc("chan", 7, RtcRole::Publisher, 1_000)
            .unwrap();
        assert_eq!(signer.verify_rtc(&token), Err(MediaTokenError::Invalid));
    }

    #[test]
    fn test_oversized_token_rejected() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            signer().verify_rtc(&token),
            Err(MediaTokenError::TokenTooLarge)
        );
    }

    #[test]
    fn test_signer_debug_redacts_certificate() {
        let debug_str = format!("{:?}", signer());
        assert!(debug_str.contains("app-123"));
        assert!(!debug_str.contains("cert-abc"));
    }
}
