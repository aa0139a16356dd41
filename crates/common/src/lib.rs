//! Common utilities and types shared across Channel Broker crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for signed media access tokens (RTC and RTM)
pub mod jwt;
