//! Channel Broker Service Library
//!
//! The Channel Broker is the stateless HTTP backend of a passphrase-based
//! video channel service. It is responsible for:
//!
//! - Channel creation with unguessable host and viewer passphrases
//! - Joining a channel by passphrase and issuing short-lived media credentials
//! - Per-channel transcription token caching
//! - Host-only cloud recording control
//! - Optional user accounts backed by opaque session tokens
//!
//! # Architecture
//!
//! The broker follows the Handler -> Service -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication and HTTP metrics
//! - `models` - Stored rows, requests and responses
//! - `observability` - Prometheus metrics
//! - `repositories` - Postgres and in-memory stores
//! - `routes` - Axum router setup
//! - `services` - Business logic and external clients

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
