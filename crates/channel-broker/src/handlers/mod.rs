//! HTTP request handlers for the Channel Broker.

pub mod channels;
pub mod health;
pub mod metrics;
pub mod recordings;
pub mod users;

pub use channels::{create_channel, join_channel, share_channel};
pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use recordings::{start_recording, stop_recording};
pub use users::{get_me, list_sessions, logout, logout_all, update_me};
