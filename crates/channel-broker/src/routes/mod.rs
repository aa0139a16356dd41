//! HTTP routes for the Channel Broker.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{
    accounts_enabled, http_metrics_middleware, optional_user, require_user, AuthState,
};
use crate::repositories::{ChannelsRepository, UsersRepository};
use crate::services::{
    CredentialIssuer, PassphraseRegistry, RecordingClientTrait, RecordingController,
    SessionAssembler, TranscriptionClientTrait, TranscriptionTokenCache,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Channel, recording and orphan store.
    pub channels: Arc<dyn ChannelsRepository>,

    /// Account and session-token store.
    pub users: Arc<dyn UsersRepository>,

    /// Passphrase resolution.
    pub registry: PassphraseRegistry,

    /// Create, join and share.
    pub sessions: SessionAssembler,

    /// Recording lifecycle.
    pub recordings: RecordingController,
}

impl AppState {
    /// Wire the services from configuration, stores and external clients.
    pub fn new(
        config: Config,
        channels: Arc<dyn ChannelsRepository>,
        users: Arc<dyn UsersRepository>,
        recording_client: Arc<dyn RecordingClientTrait>,
        transcription_client: Arc<dyn TranscriptionClientTrait>,
    ) -> Self {
        let registry = PassphraseRegistry::new(channels.clone());
        let issuer = CredentialIssuer::new(&config.credentials, config.enable_oauth);
        let transcription = TranscriptionTokenCache::new(transcription_client, channels.clone());

        let sessions = SessionAssembler::new(
            registry.clone(),
            issuer.clone(),
            transcription,
            config.pstn_number.clone(),
            config.enable_oauth,
        );
        let recordings = RecordingController::new(
            recording_client,
            channels.clone(),
            issuer,
            config.recording.storage.clone(),
        );

        Self {
            config,
            channels,
            users,
            registry,
            sessions,
            recordings,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public
/// - `/ready` - Readiness probe (checks the store) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/v1/channels*` - Create, join, share (optional authentication)
/// - `/api/v1/recordings/*` - Start and stop recording (host passphrase)
/// - `/api/v1/me`, `/api/v1/sessions*` - Accounts (authentication required,
///   404 when accounts are disabled)
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        users: state.users.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/recordings/start", post(handlers::start_recording))
        .route("/api/v1/recordings/stop", post(handlers::stop_recording))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let channel_routes = Router::new()
        .route("/api/v1/channels", post(handlers::create_channel))
        .route("/api/v1/channels/join", post(handlers::join_channel))
        .route("/api/v1/channels/share", post(handlers::share_channel))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            optional_user,
        ))
        .with_state(state.clone());

    // route_layer order: the last one added runs first.
    let account_routes = Router::new()
        .route("/api/v1/me", get(handlers::get_me).patch(handlers::update_me))
        .route(
            "/api/v1/sessions",
            get(handlers::list_sessions).delete(handlers::logout_all),
        )
        .route("/api/v1/sessions/:token", delete(handlers::logout))
        .route_layer(middleware::from_fn_with_state(auth_state, require_user))
        .route_layer(middleware::from_fn_with_state(
            state.config.enable_oauth,
            accounts_enabled,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(channel_routes)
        .merge(account_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
