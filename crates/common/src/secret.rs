//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every credential the broker
//! handles: the application certificate, the recording customer
//! certificate, bucket keys, the transcription app secret and the channel
//! media encryption secret.
//!
//! `SecretString` implements `Debug` with redaction, so a config struct or
//! request value that derives `Debug` can be logged safely. The inner value
//! is only reachable through [`ExposeSecret::expose_secret`], which makes
//! every place a secret leaves the process easy to find.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let certificate = SecretString::from("app-certificate");
//! assert!(!format!("{certificate:?}").contains("app-certificate"));
//! assert_eq!(certificate.expose_secret(), "app-certificate");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Returns `true` when the secret holds no characters.
///
/// Used when an optional secret arrives as an empty string from a client
/// and must be treated as absent.
#[must_use]
pub fn is_blank(secret: &SecretString) -> bool {
    secret.expose_secret().trim().is_empty()
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("bucket-access-secret");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("bucket-access-secret"));
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(&SecretString::from("")));
        assert!(is_blank(&SecretString::from("   ")));
        assert!(!is_blank(&SecretString::from("k3y")));
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct StartRecording {
            passphrase: String,
            secret: Option<SecretString>,
        }

        let json = r#"{"passphrase": "p", "secret": "media-key"}"#;
        let request: StartRecording = serde_json::from_str(json).expect("deserialize");

        assert_eq!(
            request.secret.as_ref().map(|s| s.expose_secret()),
            Some("media-key")
        );
        assert!(!format!("{request:?}").contains("media-key"));
    }
}
