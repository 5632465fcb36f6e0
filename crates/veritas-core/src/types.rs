//! Core domain types for the Veritas flight recorder.
//!
//! These types describe what an agent session records: log entries, their
//! classification, and the digests that bind them together. They are shared
//! by the recorder engine, the stores, and the CLI.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::VeritasError;
use crate::payload::Payload;

/// Tool name used for entries produced by the recorder itself
/// (failed tool calls, internal notes).
pub const SYSTEM_TOOL: &str = "System";

// ── Session ──────────────────────────────────────────────────────

/// Unique identifier for one agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a session. Transitions only move forward:
/// `Open → Sealed → Attested`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Open,
    Sealed,
    Attested,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Sealed => "SEALED",
            Self::Attested => "ATTESTED",
        };
        f.write_str(s)
    }
}

// ── Entries ──────────────────────────────────────────────────────

/// Classification of a log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A consequential tool invocation (transfer, deploy, post...).
    Action,
    /// Something the agent looked at; the only valid basis for an action.
    Observation,
    /// Internal reasoning note.
    Thought,
    /// A failed invocation or recorder-side problem.
    Error,
}

impl EventType {
    /// Stable one-byte tag used by the canonical encoder.
    pub fn tag(self) -> u8 {
        match self {
            Self::Action => 0,
            Self::Observation => 1,
            Self::Thought => 2,
            Self::Error => 3,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Action => "ACTION",
            Self::Observation => "OBSERVATION",
            Self::Thought => "THOUGHT",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Caller-supplied fields of an entry, before the recorder assigns a
/// sequence id and computes its hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryDraft {
    pub event_type: EventType,
    pub tool_name: String,
    #[serde(default)]
    pub input_params: Payload,
    #[serde(default)]
    pub output_result: Payload,
    /// Capture time; defaults to the moment the draft is deserialized.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub basis_id: Option<u64>,
}

impl EntryDraft {
    pub fn new(
        event_type: EventType,
        tool_name: &str,
        input_params: impl Into<Payload>,
        output_result: impl Into<Payload>,
    ) -> Self {
        Self {
            event_type,
            tool_name: tool_name.to_string(),
            input_params: input_params.into(),
            output_result: output_result.into(),
            timestamp: Utc::now(),
            basis_id: None,
        }
    }

    pub fn observation(
        tool_name: &str,
        input_params: impl Into<Payload>,
        output_result: impl Into<Payload>,
    ) -> Self {
        Self::new(EventType::Observation, tool_name, input_params, output_result)
    }

    pub fn action(
        tool_name: &str,
        input_params: impl Into<Payload>,
        output_result: impl Into<Payload>,
    ) -> Self {
        Self::new(EventType::Action, tool_name, input_params, output_result)
    }

    pub fn thought(text: &str) -> Self {
        Self::new(EventType::Thought, SYSTEM_TOOL, Payload::Null, text)
    }

    pub fn error(tool_name: &str, input_params: impl Into<Payload>, message: &str) -> Self {
        Self::new(EventType::Error, tool_name, input_params, message)
    }

    /// Cite an earlier observation as the justification for this entry.
    pub fn with_basis(mut self, basis_id: u64) -> Self {
        self.basis_id = Some(basis_id);
        self
    }

    /// Override the capture time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An immutable, hash-chained record of one agent event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub sequence_id: u64,
    pub event_type: EventType,
    pub tool_name: String,
    pub input_params: Payload,
    pub output_result: Payload,
    pub timestamp: DateTime<Utc>,
    pub basis_id: Option<u64>,
    /// `H(prev_entry_hash ‖ H(canonical fields))`.
    pub entry_hash: Digest,
}

// ── Digest ───────────────────────────────────────────────────────

/// A 32-byte BLAKE3 digest, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, VeritasError> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(clean, &mut bytes)
            .map_err(|e| VeritasError::InvalidDigest(format!("{s}: {e}")))?;
        Ok(Self(bytes))
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = VeritasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
