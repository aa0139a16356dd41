//! Account and session handlers.
//!
//! Mounted behind `require_user`; available only when user accounts are
//! enabled.

use crate::errors::BrokerError;
use crate::models::{UpdateNameRequest, User, MAX_NAME_LENGTH};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/v1/me
#[instrument(skip_all, name = "broker.handlers.get_me")]
pub async fn get_me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

/// Handler for PATCH /api/v1/me
///
/// Updates the caller's display name.
#[instrument(skip_all, name = "broker.handlers.update_me")]
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateNameRequest>,
) -> Result<Json<User>, BrokerError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(BrokerError::BadRequest("Name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(BrokerError::BadRequest(format!(
            "Name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }

    let updated = state.users.update_name(&user.email, name).await?;
    Ok(Json(updated))
}

/// Handler for GET /api/v1/sessions
///
/// Lists the caller's active session token ids.
#[instrument(skip_all, name = "broker.handlers.list_sessions")]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<String>>, BrokerError> {
    Ok(Json(state.users.list_tokens(&user.email).await?))
}

/// Handler for DELETE /api/v1/sessions/:token
///
/// Revokes one of the caller's tokens and returns the remaining ones.
#[instrument(skip_all, name = "broker.handlers.logout")]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(token): Path<String>,
) -> Result<Json<Vec<String>>, BrokerError> {
    if !state.users.delete_token(&user.email, &token).await? {
        return Err(BrokerError::BadRequest("Unknown session token".to_string()));
    }

    tracing::info!(target: "broker.handlers.users", "Session token revoked");
    Ok(Json(state.users.list_tokens(&user.email).await?))
}

/// Handler for DELETE /api/v1/sessions
///
/// Revokes all of the caller's tokens, including the one used for this call.
#[instrument(skip_all, name = "broker.handlers.logout_all")]
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<String>>, BrokerError> {
    let removed = state.users.delete_all_tokens(&user.email).await?;

    tracing::info!(target: "broker.handlers.users", removed = removed, "All session tokens revoked");
    Ok(Json(state.users.list_tokens(&user.email).await?))
}
