//! Service layer for the Channel Broker.
//!
//! This module contains services that interact with external systems
//! and encapsulate business logic.
//!
//! # Components
//!
//! - `passphrase` - Channel identity generation and passphrase resolution
//! - `credentials` - Participant uid and RTC/RTM token issuance
//! - `transcription` - Transcription provider client and per-channel token cache
//! - `recording_client` - HTTP client for the cloud recording REST API
//! - `recording` - Recording lifecycle (acquire, start, stop)
//! - `session` - Create, join and share channel operations

pub mod credentials;
pub mod passphrase;
pub mod recording;
pub mod recording_client;
pub mod session;
pub mod transcription;

pub use credentials::{CredentialIssuer, ParticipantKind};
pub use passphrase::PassphraseRegistry;
pub use recording::RecordingController;
pub use recording_client::{RecordingClient, RecordingClientTrait, RecordingError};
pub use session::SessionAssembler;
pub use transcription::{TranscriptionClient, TranscriptionClientTrait, TranscriptionTokenCache};
