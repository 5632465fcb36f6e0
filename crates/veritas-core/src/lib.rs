//! veritas-core: Shared types, configuration, and error handling for the Veritas flight recorder.
//!
//! This crate provides the foundational types used across all Veritas components:
//! - Log entries, drafts, and event classification
//! - Structured payloads with a closed set of variants
//! - BLAKE3 digests with hex serialization
//! - Live-view events
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod payload;
pub mod types;

pub use config::RecorderConfig;
pub use error::{EncodingError, VeritasError};
pub use events::{EventPayload, RecorderEvent};
pub use payload::Payload;
pub use types::{Digest, EntryDraft, EventType, LogEntry, SessionId, SessionStatus, SYSTEM_TOOL};
