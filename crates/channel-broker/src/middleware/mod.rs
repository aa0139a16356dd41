//! Middleware for the Channel Broker.
//!
//! # Components
//!
//! - `auth` - Session-token authentication (required and optional)
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{accounts_enabled, optional_user, require_user, AuthState};
pub use http_metrics::http_metrics_middleware;
