//! # Broker Test Utilities
//!
//! Shared test utilities for the Channel Broker.
//!
//! This crate provides:
//! - Server test harness (`TestBrokerServer` for E2E tests)
//! - Provider stubs for the recording and transcription APIs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestBrokerServer::spawn().await?;
//!     let client = reqwest::Client::new();
//!
//!     let response = client
//!         .get(format!("{}/health", server.url()))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod providers;
pub mod server_harness;

// Re-export commonly used items
pub use providers::*;
pub use server_harness::*;
