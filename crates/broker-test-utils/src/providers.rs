//! Wiremock stubs for the external providers.
//!
//! Paths match what the broker's real HTTP clients call.

use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// App id the harness configures for credentials and recording.
pub const TEST_APP_ID: &str = "test-app-id";

/// Path of the transcription token exchange.
pub const TRANSCRIPTION_TOKEN_PATH: &str = "/oauth2/token:generate";

fn recording_base() -> String {
    format!("/v1/apps/{}/cloud_recording", TEST_APP_ID)
}

/// Answer every transcription token request with `token`.
pub async fn mount_transcription_token(server: &MockServer, token: &str, expires_in: f64) {
    Mock::given(method("POST"))
        .and(path(TRANSCRIPTION_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": token,
            "expiresIn": expires_in,
        })))
        .mount(server)
        .await;
}

/// Fail every transcription token request.
pub async fn mount_transcription_failure(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TRANSCRIPTION_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(server)
        .await;
}

/// Accept acquire, start and stop with fixed ids.
pub async fn mount_recording_success(server: &MockServer, resource_id: &str, session_id: &str) {
    let base = recording_base();

    Mock::given(method("POST"))
        .and(path(format!("{}/acquire", base)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "resourceId": resource_id })),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!(
            "{}/resourceid/{}/mode/mix/start",
            base, resource_id
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceId": resource_id,
            "sid": session_id,
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!(
            "{}/resourceid/{}/sid/{}/mode/mix/stop",
            base, resource_id, session_id
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceId": resource_id,
            "sid": session_id,
        })))
        .mount(server)
        .await;
}

/// Accept acquire but reject start.
pub async fn mount_recording_start_failure(server: &MockServer, resource_id: &str) {
    let base = recording_base();

    Mock::given(method("POST"))
        .and(path(format!("{}/acquire", base)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "resourceId": resource_id })),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"/mode/mix/start$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

/// Number of requests the stub received whose path ends with `suffix`.
pub async fn requests_ending_with(server: &MockServer, suffix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .count()
}
