//! Channel handlers.
//!
//! Passphrases arrive in request bodies and are never logged.

use crate::errors::BrokerError;
use crate::models::{CreateChannelRequest, PassphraseRequest, Session, ShareResponse, User};
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/channels
///
/// Creates a channel and returns its share payload with `201 Created`.
#[instrument(skip_all, name = "broker.handlers.create_channel")]
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    caller: Option<Extension<User>>,
    Json(request): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ShareResponse>), BrokerError> {
    let caller = caller.map(|Extension(user)| user);

    let share = state
        .sessions
        .create_channel(&request.title, request.enable_pstn, caller.as_ref())
        .await?;

    Ok((StatusCode::CREATED, Json(share)))
}

/// Handler for POST /api/v1/channels/join
#[instrument(skip_all, name = "broker.handlers.join_channel")]
pub async fn join_channel(
    State(state): State<Arc<AppState>>,
    caller: Option<Extension<User>>,
    Json(request): Json<PassphraseRequest>,
) -> Result<Json<Session>, BrokerError> {
    let caller = caller.map(|Extension(user)| user);

    let session = state
        .sessions
        .join_channel(&request.passphrase, caller.as_ref())
        .await?;

    Ok(Json(session))
}

/// Handler for POST /api/v1/channels/share
#[instrument(skip_all, name = "broker.handlers.share_channel")]
pub async fn share_channel(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PassphraseRequest>,
) -> Result<Json<ShareResponse>, BrokerError> {
    Ok(Json(state.sessions.share(&request.passphrase).await?))
}
