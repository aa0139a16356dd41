//! Recording control integration tests.
//!
//! The real recording client talks to a wiremock stub of the cloud
//! recording API.

use broker_test_utils::{
    mount_recording_start_failure, mount_recording_success, mount_transcription_token,
    requests_ending_with, TestBrokerServer,
};
use channel_broker::repositories::ChannelsRepository;
use serde_json::{json, Value};

struct Channel {
    name: String,
    host: String,
    view: String,
}

async fn setup() -> Result<(TestBrokerServer, Channel), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    mount_transcription_token(server.transcription_api(), "tok", 3600.0).await;

    let created: Value = reqwest::Client::new()
        .post(format!("{}/api/v1/channels", server.url()))
        .json(&json!({ "title": "Recorded" }))
        .send()
        .await?
        .json()
        .await?;

    let field = |v: &Value| v.as_str().unwrap_or_default().to_string();
    let channel = Channel {
        name: field(&created["channel"]),
        host: field(&created["passphrase"]["host"]),
        view: field(&created["passphrase"]["view"]),
    };
    Ok((server, channel))
}

async fn recording_call(
    server: &TestBrokerServer,
    action: &str,
    body: Value,
) -> Result<(reqwest::StatusCode, Value), anyhow::Error> {
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/recordings/{}", server.url(), action))
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    Ok((status, response.json().await?))
}

async fn start_bodies(server: &TestBrokerServer) -> Vec<Value> {
    server
        .recording_api()
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with("/mode/mix/start"))
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

#[tokio::test]
async fn test_host_can_start_and_stop_recording() -> Result<(), anyhow::Error> {
    let (server, channel) = setup().await?;
    mount_recording_success(server.recording_api(), "rid-1", "sid-1").await;

    let (status, body) =
        recording_call(&server, "start", json!({ "passphrase": channel.host })).await?;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "success");
    assert_eq!(requests_ending_with(server.recording_api(), "/acquire").await, 1);
    assert_eq!(requests_ending_with(server.recording_api(), "/mode/mix/start").await, 1);

    let stored = server
        .channels()
        .channel_by_name(&channel.name)
        .ok_or_else(|| anyhow::anyhow!("channel not stored"))?;
    let recording = server
        .channels()
        .find_recording(stored.channel_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("recording not stored"))?;
    assert_eq!(recording.resource_id, "rid-1");
    assert_eq!(recording.session_id, "sid-1");

    let (status, body) =
        recording_call(&server, "stop", json!({ "passphrase": channel.host })).await?;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "success");
    assert_eq!(requests_ending_with(server.recording_api(), "/mode/mix/stop").await, 1);

    Ok(())
}

#[tokio::test]
async fn test_viewer_cannot_control_recording() -> Result<(), anyhow::Error> {
    let (server, channel) = setup().await?;
    mount_recording_success(server.recording_api(), "rid-1", "sid-1").await;

    let (status, body) =
        recording_call(&server, "start", json!({ "passphrase": channel.view })).await?;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) =
        recording_call(&server, "stop", json!({ "passphrase": channel.view })).await?;
    assert_eq!(status, 403);

    let received = server
        .recording_api()
        .received_requests()
        .await
        .unwrap_or_default();
    assert!(received.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_stop_without_start_is_not_found() -> Result<(), anyhow::Error> {
    let (server, channel) = setup().await?;

    let (status, body) =
        recording_call(&server, "stop", json!({ "passphrase": channel.host })).await?;

    assert_eq!(status, 404);
    assert_eq!(body["error"]["message"], "Recording not found");
    assert_eq!(requests_ending_with(server.recording_api(), "/mode/mix/stop").await, 0);

    Ok(())
}

#[tokio::test]
async fn test_unknown_passphrase_is_not_found() -> Result<(), anyhow::Error> {
    let (server, _) = setup().await?;

    let (status, _) =
        recording_call(&server, "start", json!({ "passphrase": "no-such-passphrase" })).await?;

    assert_eq!(status, 404);

    Ok(())
}

#[tokio::test]
async fn test_decryption_fields_follow_secret() -> Result<(), anyhow::Error> {
    let (server, channel) = setup().await?;
    mount_recording_success(server.recording_api(), "rid-1", "sid-1").await;

    let (status, _) =
        recording_call(&server, "start", json!({ "passphrase": channel.host })).await?;
    assert_eq!(status, 200);

    let (status, _) = recording_call(
        &server,
        "start",
        json!({ "passphrase": channel.host, "secret": "media-key" }),
    )
    .await?;
    assert_eq!(status, 200);

    let bodies = start_bodies(&server).await;
    assert_eq!(bodies.len(), 2);

    let plain = bodies
        .first()
        .ok_or_else(|| anyhow::anyhow!("missing start body"))?;
    assert!(plain["clientRequest"]["recordingConfig"]
        .get("decryptionMode")
        .is_none());
    assert!(plain["clientRequest"]["recordingConfig"].get("secret").is_none());

    let encrypted = bodies
        .get(1)
        .ok_or_else(|| anyhow::anyhow!("missing start body"))?;
    assert_eq!(encrypted["clientRequest"]["recordingConfig"]["decryptionMode"], 1);
    assert_eq!(encrypted["clientRequest"]["recordingConfig"]["secret"], "media-key");

    Ok(())
}

#[tokio::test]
async fn test_start_failure_keeps_orphaned_resource() -> Result<(), anyhow::Error> {
    let (server, channel) = setup().await?;
    mount_recording_start_failure(server.recording_api(), "rid-lost").await;

    let (status, body) =
        recording_call(&server, "start", json!({ "passphrase": channel.host })).await?;

    assert_eq!(status, 500);
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
    assert_eq!(body["error"]["message"], "An upstream service request failed");

    let orphans = server.channels().list_orphaned_resources().await?;
    assert_eq!(orphans.len(), 1);
    let orphan = orphans
        .first()
        .ok_or_else(|| anyhow::anyhow!("missing orphan"))?;
    assert_eq!(orphan.resource_id, "rid-lost");
    assert_eq!(orphan.channel_name, channel.name);
    assert!(orphan.session_id.is_none());

    Ok(())
}
