//! Session-token authentication middleware.
//!
//! Provides three middleware functions:
//! - `accounts_enabled` - Account routes; 404 unless user accounts are enabled
//! - `require_user` - Account routes; rejects requests without a valid token
//! - `optional_user` - Channel routes; attaches the caller when a valid token
//!   is present and lets anonymous requests through
//!
//! Both read `Authorization: Bearer <token_id>`, look the token up in the
//! session-token store, and insert the owning [`User`] into request
//! extensions.

use crate::errors::BrokerError;
use crate::models::User;
use crate::repositories::UsersRepository;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Session-token lookup.
    pub users: Arc<dyn UsersRepository>,
}

/// Extract the bearer token from the Authorization header.
///
/// Returns `Ok(None)` when the header is absent.
fn extract_bearer_token(req: &Request) -> Result<Option<&str>, BrokerError> {
    let Some(auth_header) = req.headers().get("authorization") else {
        return Ok(None);
    };

    auth_header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Some)
        .ok_or_else(|| {
            tracing::debug!(target: "broker.middleware.auth", "Invalid Authorization header format");
            BrokerError::InvalidToken("Invalid Authorization header format".to_string())
        })
}

async fn lookup(state: &AuthState, token: &str) -> Result<User, BrokerError> {
    state.users.find_user_by_token(token).await?.ok_or_else(|| {
        tracing::debug!(target: "broker.middleware.auth", "Unknown session token");
        BrokerError::InvalidToken("Invalid or expired session token".to_string())
    })
}

/// Gate for account routes.
///
/// Runs before `require_user`, so a deployment without accounts answers 404
/// regardless of the Authorization header.
pub async fn accounts_enabled(
    State(enabled): State<bool>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    if !enabled {
        return Err(BrokerError::NotFound(
            "User accounts are not enabled".to_string(),
        ));
    }
    Ok(next.run(req).await)
}

/// Authentication middleware for account routes.
///
/// # Response
///
/// - Returns 401 Unauthorized if the token is missing or unknown
/// - Continues with `User` in extensions otherwise
#[instrument(skip_all, name = "broker.middleware.require_user")]
pub async fn require_user(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    let token = extract_bearer_token(&req)?.ok_or_else(|| {
        tracing::debug!(target: "broker.middleware.auth", "Missing Authorization header");
        BrokerError::InvalidToken("Missing Authorization header".to_string())
    })?;

    let user = lookup(&state, token).await?;
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Optional authentication for channel routes.
///
/// Anonymous requests and requests with an unusable token continue without
/// a `User`; whether that is acceptable is decided by the operation.
#[instrument(skip_all, name = "broker.middleware.optional_user")]
pub async fn optional_user(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    let token = extract_bearer_token(&req).ok().flatten().map(str::to_string);

    if let Some(token) = token {
        match lookup(&state, &token).await {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(BrokerError::InvalidToken(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryUsersRepository;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn whoami(user: Option<Extension<User>>) -> String {
        user.map(|Extension(u)| u.email)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn auth_state() -> Arc<AuthState> {
        let users = InMemoryUsersRepository::new();
        users.insert_user(User {
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
        });
        users.insert_token("alice@example.com", "tok-alice");
        Arc::new(AuthState {
            users: Arc::new(users),
        })
    }

    fn app() -> Router {
        let state = auth_state();
        let required = Router::new()
            .route("/required", get(whoami))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_user));
        let optional = Router::new()
            .route("/optional", get(whoami))
            .route_layer(middleware::from_fn_with_state(state, optional_user));
        required.merge(optional)
    }

    fn gated_app(enabled: bool) -> Router {
        Router::new()
            .route("/required", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state(), require_user))
            .route_layer(middleware::from_fn_with_state(enabled, accounts_enabled))
    }

    async fn call(uri: &str, auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_require_user_accepts_known_token() {
        let (status, body) = call("/required", Some("Bearer tok-alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice@example.com");
    }

    #[tokio::test]
    async fn test_require_user_rejects_missing_header() {
        let (status, _) = call("/required", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_user_rejects_unknown_token() {
        let (status, _) = call("/required", Some("Bearer nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_user_rejects_wrong_scheme() {
        let (status, _) = call("/required", Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_accounts_disabled_is_not_found_before_auth() {
        let response = gated_app(false)
            .oneshot(
                HttpRequest::builder()
                    .uri("/required")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = gated_app(true)
            .oneshot(
                HttpRequest::builder()
                    .uri("/required")
                    .header("authorization", "Bearer tok-alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_optional_user_attaches_known_caller() {
        let (status, body) = call("/optional", Some("Bearer tok-alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice@example.com");
    }

    #[tokio::test]
    async fn test_optional_user_lets_anonymous_through() {
        assert_eq!(
            call("/optional", None).await,
            (StatusCode::OK, "anonymous".to_string())
        );
        assert_eq!(
            call("/optional", Some("Bearer unknown")).await,
            (StatusCode::OK, "anonymous".to_string())
        );
    }
}
