//! Session storage: the store trait plus in-memory and file-backed backends.
//!
//! The store is the only registry of live sessions. It is injected into the
//! [`SessionManager`](crate::manager::SessionManager); nothing in the crate
//! keeps ambient state. Each live session sits behind its own mutex so that
//! writes to one session are serialized while sessions stay independent.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veritas_core::{Digest, LogEntry, SessionId, SessionStatus};

use crate::evidence::EvidencePolicy;
use crate::session::{Session, SessionRecord};

/// Shared handle to one live session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Lock a session, recovering the guard if a previous holder panicked.
/// Appends only touch the log after every check has passed, so a poisoned
/// lock never guards a half-written entry.
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors that can occur during session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("Integrity check failed for session {session_id}: {detail}")]
    IntegrityViolation { session_id: SessionId, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query parameters for listing sessions.
#[derive(Debug, Default, Clone)]
pub struct SessionQuery {
    /// Filter by agent.
    pub agent_id: Option<String>,
    /// Filter by lifecycle state.
    pub status: Option<SessionStatus>,
    /// Only include sessions started at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include sessions started at or before this time.
    pub to: Option<DateTime<Utc>>,
}

/// Lightweight listing row for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub session_root: Option<Digest>,
    pub attestation_ref: Option<String>,
    pub entry_count: u64,
    pub corrupted: bool,
}

impl From<SessionRecord> for SessionSummary {
    fn from(record: SessionRecord) -> Self {
        Self {
            session_id: record.session_id,
            agent_id: record.agent_id,
            started_at: record.started_at,
            status: record.status,
            session_root: record.session_root,
            attestation_ref: record.attestation_ref,
            entry_count: record.entry_count,
            corrupted: record.corruption.is_some(),
        }
    }
}

/// Trait for session persistence backends.
pub trait SessionStore: Send + Sync {
    /// Register a new session and return its live handle.
    fn insert(&self, session: Session) -> Result<SessionHandle, StoreError>;

    /// Live handle for a session, loading (and verifying) it if needed.
    fn get(&self, id: SessionId) -> Result<SessionHandle, StoreError>;

    /// Write through the current state of a session. Entries are appended;
    /// metadata is replaced.
    fn persist(&self, session: &Session) -> Result<(), StoreError>;

    /// List sessions matching the query, newest first.
    fn list(&self, query: &SessionQuery) -> Result<Vec<SessionSummary>, StoreError>;
}

// ── In-memory store ──────────────────────────────────────────────

/// Volatile store: sessions live as long as the process.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: Session) -> Result<SessionHandle, StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let id = session.id();
        if sessions.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(id, handle.clone());
        Ok(handle)
    }

    fn get(&self, id: SessionId) -> Result<SessionHandle, StoreError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn persist(&self, _session: &Session) -> Result<(), StoreError> {
        Ok(())
    }

    fn list(&self, query: &SessionQuery) -> Result<Vec<SessionSummary>, StoreError> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut results: Vec<SessionSummary> = handles
            .iter()
            .map(|h| SessionSummary::from(lock_session(h).record()))
            .filter(|s| matches_query(s, query))
            .collect();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(results)
    }
}

// ── File-backed store ────────────────────────────────────────────

const RECORD_FILE: &str = "session.json";
const ENTRIES_FILE: &str = "entries.jsonl";

/// File-system backed session store.
///
/// Each session gets a directory keyed by start date and id:
/// ```text
/// {root}/
///   2024/
///     01/
///       15/
///         {session_id}/
///           session.json    metadata: status, root, attestation ref
///           entries.jsonl   one entry per line, append-only
/// ```
///
/// Loading a session rebuilds and re-verifies its hash chain and, for
/// sealed sessions, its Merkle root.
pub struct FileSessionStore {
    root: PathBuf,
    policy: EvidencePolicy,
    live: RwLock<HashMap<SessionId, SessionHandle>>,
    /// Entries already on disk, per session.
    written: Mutex<HashMap<SessionId, u64>>,
}

impl FileSessionStore {
    /// Create a new store rooted at the given directory.
    /// Creates the directory if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            policy: EvidencePolicy::default(),
            live: RwLock::new(HashMap::new()),
            written: Mutex::new(HashMap::new()),
        })
    }

    /// Evidence policy applied to sessions loaded from disk.
    pub fn with_policy(mut self, policy: EvidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a session based on its start date and ID.
    fn session_dir(&self, session_id: SessionId, started_at: &DateTime<Utc>) -> PathBuf {
        let date = started_at.format("%Y/%m/%d");
        self.root.join(format!("{}/{}", date, session_id.0))
    }

    /// Locate a session directory by scanning the date tree.
    fn find_dir(&self, id: SessionId) -> Result<PathBuf, StoreError> {
        let name = id.0.to_string();
        find_dir_recursive(&self.root, &name).ok_or(StoreError::NotFound(id))
    }

    fn load(&self, id: SessionId) -> Result<Session, StoreError> {
        let dir = self.find_dir(id)?;
        let record: SessionRecord =
            serde_json::from_str(&fs::read_to_string(dir.join(RECORD_FILE))?)?;
        let entries = read_entries(&dir.join(ENTRIES_FILE))?;

        Session::restore(record, entries, self.policy).map_err(|e| {
            tracing::error!(session_id = %id, error = %e, "Stored session failed verification");
            StoreError::IntegrityViolation {
                session_id: id,
                detail: e.to_string(),
            }
        })
    }

    fn write_record(dir: &Path, record: &SessionRecord) -> Result<(), StoreError> {
        let tmp = dir.join(format!("{RECORD_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        fs::rename(&tmp, dir.join(RECORD_FILE))?;
        Ok(())
    }

    fn written_count(&self, id: SessionId) -> u64 {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    fn set_written_count(&self, id: SessionId, count: u64) {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, count);
    }
}

impl SessionStore for FileSessionStore {
    fn insert(&self, session: Session) -> Result<SessionHandle, StoreError> {
        let id = session.id();
        let dir = self.session_dir(id, &session.started_at());
        if dir.exists() || self.live.read().unwrap_or_else(PoisonError::into_inner).contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        fs::create_dir_all(&dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(ENTRIES_FILE))?;
        self.set_written_count(id, 0);
        self.persist(&session)?;

        let handle = Arc::new(Mutex::new(session));
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.clone());

        tracing::debug!(session_id = %id, path = %dir.display(), "Session created");
        Ok(handle)
    }

    fn get(&self, id: SessionId) -> Result<SessionHandle, StoreError> {
        if let Some(handle) = self
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Ok(handle.clone());
        }

        let session = self.load(id)?;
        let count = session.entries().len() as u64;

        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have loaded it while we were reading.
        if let Some(handle) = live.get(&id) {
            return Ok(handle.clone());
        }
        self.set_written_count(id, count);
        let handle = Arc::new(Mutex::new(session));
        live.insert(id, handle.clone());

        tracing::debug!(session_id = %id, entries = count, "Session loaded");
        Ok(handle)
    }

    fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let id = session.id();
        let dir = self.session_dir(id, &session.started_at());
        fs::create_dir_all(&dir)?;

        let already = self.written_count(id);
        let entries = session.entries();
        let start = usize::try_from(already).unwrap_or(usize::MAX).min(entries.len());
        if start < entries.len() {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(ENTRIES_FILE))?;
            for entry in &entries[start..] {
                writeln!(file, "{}", serde_json::to_string(entry)?)?;
            }
            file.flush()?;
            self.set_written_count(id, entries.len() as u64);
        }

        Self::write_record(&dir, &session.record())?;
        Ok(())
    }

    fn list(&self, query: &SessionQuery) -> Result<Vec<SessionSummary>, StoreError> {
        let mut results = Vec::new();

        collect_records_recursive(&self.root, query, &mut results)?;
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(results)
    }
}

fn read_entries(path: &Path) -> Result<Vec<LogEntry>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

/// Recursively find a directory by name.
fn find_dir_recursive(dir: &Path, name: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some(name) {
            return Some(path);
        }
        if let Some(found) = find_dir_recursive(&path, name) {
            return Some(found);
        }
    }

    None
}

/// Recursively collect session records matching a query.
fn collect_records_recursive(
    dir: &Path,
    query: &SessionQuery,
    results: &mut Vec<SessionSummary>,
) -> Result<(), StoreError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(dir)?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_records_recursive(&path, query, results)?;
        } else if path.file_name().and_then(|n| n.to_str()) == Some(RECORD_FILE) {
            let record: SessionRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
            let summary = SessionSummary::from(record);
            if matches_query(&summary, query) {
                results.push(summary);
            }
        }
    }

    Ok(())
}

/// Check whether a session matches the given query filters.
fn matches_query(summary: &SessionSummary, query: &SessionQuery) -> bool {
    if let Some(aid) = &query.agent_id {
        if &summary.agent_id != aid {
            return false;
        }
    }
    if let Some(status) = query.status {
        if summary.status != status {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &summary.started_at < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &summary.started_at > to {
            return false;
        }
    }
    true
}
