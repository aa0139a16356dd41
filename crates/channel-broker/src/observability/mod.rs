//! Observability module for the Channel Broker.
//!
//! Provides metrics definitions used by the HTTP middleware, services and
//! repositories.

pub mod metrics;
