//! Registry of in-flight streaming exports.
//!
//! Each export moves through `Opened -> Streaming -> {Completed | Failed}`.
//! The record exists only while the export is live and is removed when it
//! reaches a terminal state.

use std::path::{Path, PathBuf};
use std::time::Instant;

use dashmap::DashMap;

/// Session identifier (UUID v4 text).
pub type SessionId = String;

/// Lifecycle state of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// File opened, `start` emitted, no chunk read yet.
    Opened,
    /// At least one chunk has been emitted.
    Streaming,
    /// `end` emitted.
    Completed,
    /// `error` emitted, or the channel went away.
    Failed,
}

impl SessionState {
    /// Whether the export has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Book-keeping for one export.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// File being exported.
    pub path: PathBuf,
    /// Current state.
    pub state: SessionState,
    /// Bytes emitted in `data` events so far.
    pub bytes_sent: u64,
    /// Number of `data` events emitted so far.
    pub chunks: u64,
    /// When the export was opened.
    pub started_at: Instant,
}

/// Concurrent map of live exports.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionRecord>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened export.
    pub fn open(&self, session: &str, path: &Path) {
        self.sessions.insert(
            session.to_string(),
            SessionRecord {
                path: path.to_path_buf(),
                state: SessionState::Opened,
                bytes_sent: 0,
                chunks: 0,
                started_at: Instant::now(),
            },
        );
    }

    /// Account for an emitted chunk.
    pub fn record_chunk(&self, session: &str, len: usize) {
        if let Some(mut record) = self.sessions.get_mut(session) {
            record.state = SessionState::Streaming;
            record.bytes_sent += len as u64;
            record.chunks += 1;
        }
    }

    /// Move an export to a terminal state and drop it from the registry.
    ///
    /// Returns the final record, or `None` if the session was unknown.
    pub fn finish(&self, session: &str, state: SessionState) -> Option<SessionRecord> {
        debug_assert!(state.is_terminal());
        self.sessions.remove(session).map(|(_, mut record)| {
            record.state = state;
            record
        })
    }

    /// Snapshot of a live export.
    pub fn get(&self, session: &str) -> Option<SessionRecord> {
        self.sessions.get(session).map(|r| r.value().clone())
    }

    /// Snapshot of every live export.
    pub fn active(&self) -> Vec<(SessionId, SessionRecord)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of live exports.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no export is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let registry = SessionRegistry::new();
        registry.open("a", Path::new("/tmp/a"));

        let record = registry.get("a").unwrap();
        assert_eq!(record.state, SessionState::Opened);
        assert_eq!(record.bytes_sent, 0);

        registry.record_chunk("a", 10);
        registry.record_chunk("a", 5);
        let record = registry.get("a").unwrap();
        assert_eq!(record.state, SessionState::Streaming);
        assert_eq!(record.bytes_sent, 15);
        assert_eq!(record.chunks, 2);

        let done = registry.finish("a", SessionState::Completed).unwrap();
        assert_eq!(done.state, SessionState::Completed);
        assert_eq!(done.bytes_sent, 15);
        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_finish_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(registry.finish("ghost", SessionState::Failed).is_none());
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        registry.open("a", Path::new("/a"));
        registry.open("b", Path::new("/b"));
        registry.record_chunk("a", 100);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("b").unwrap().bytes_sent, 0);

        registry.finish("a", SessionState::Failed);
        let active = registry.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, "b");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Opened.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
    }
}
