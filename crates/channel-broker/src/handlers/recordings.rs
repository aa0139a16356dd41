//! Recording control handlers.

use crate::errors::BrokerError;
use crate::models::{PassphraseRequest, RecordingActionResponse, StartRecordingRequest};
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/recordings/start
///
/// Host only. The optional `secret` enables decryption for encrypted channels.
#[instrument(skip_all, name = "broker.handlers.start_recording")]
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRecordingRequest>,
) -> Result<Json<RecordingActionResponse>, BrokerError> {
    let resolved = state.registry.resolve_passphrase(&request.passphrase).await?;

    state
        .recordings
        .start(&resolved, request.secret.as_ref())
        .await?;

    Ok(Json(RecordingActionResponse::success()))
}

/// Handler for POST /api/v1/recordings/stop
#[instrument(skip_all, name = "broker.handlers.stop_recording")]
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PassphraseRequest>,
) -> Result<Json<RecordingActionResponse>, BrokerError> {
    let resolved = state.registry.resolve_passphrase(&request.passphrase).await?;

    state.recordings.stop(&resolved).await?;

    Ok(Json(RecordingActionResponse::success()))
}
