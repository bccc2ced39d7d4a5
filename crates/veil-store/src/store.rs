use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use veil_core::{ChatSession, SessionId};

use crate::error::StoreError;

/// On-disk file name. The whole session list lives in this one document and
/// is always rewritten as a unit.
pub const STORE_FILE: &str = "secure-chats-v1.json";

struct Inner {
    sessions: Vec<ChatSession>,
    active: SessionId,
}

/// Session persistence: an in-memory session list mirrored to a single JSON
/// file. Every mutation rewrites the file atomically (temp file + rename),
/// so a crash mid-write leaves the previous state intact.
///
/// Sessions are ordered newest-first; the first one is the default active
/// session after a restart.
pub struct SessionStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl SessionStore {
    /// Open the store at `path`, restoring persisted sessions. A missing,
    /// empty, or unreadable file falls back to a single fresh session —
    /// the store never starts without one.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let seed = ChatSession::new();
        let active = seed.id.clone();
        let store = Self {
            path,
            inner: Mutex::new(Inner {
                sessions: vec![seed],
                active,
            }),
        };
        store.restore()?;
        Ok(store)
    }

    /// Re-read the file, replacing in-memory state, and return the active
    /// session id. Falls back to a single fresh session when the file is
    /// missing, corrupt, or holds an empty list.
    pub fn restore(&self) -> Result<SessionId, StoreError> {
        let sessions = match Self::load(&self.path) {
            Some(sessions) if !sessions.is_empty() => {
                debug!(count = sessions.len(), "restored sessions");
                sessions
            }
            _ => vec![ChatSession::new()],
        };
        let active = sessions[0].id.clone();
        {
            let mut inner = self.inner.lock();
            inner.sessions = sessions;
            inner.active = active.clone();
        }
        self.persist()?;
        Ok(active)
    }

    fn load(path: &Path) -> Option<Vec<ChatSession>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "session file unreadable, starting fresh");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(sessions) => Some(sessions),
            Err(e) => {
                warn!(error = %e, "session file corrupt, starting fresh");
                None
            }
        }
    }

    /// Create a fresh session, make it active, and persist.
    #[instrument(skip(self))]
    pub fn create(&self) -> Result<ChatSession, StoreError> {
        let session = ChatSession::new();
        {
            let mut inner = self.inner.lock();
            inner.sessions.insert(0, session.clone());
            inner.active = session.id.clone();
        }
        self.persist()?;
        debug!(session_id = %session.id, "created session");
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Result<ChatSession, StoreError> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Apply a mutation to one session, bump its `updated_at`, and persist.
    /// Returns the session as written.
    #[instrument(skip(self, f), fields(session_id = %id))]
    pub fn update(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut ChatSession),
    ) -> Result<ChatSession, StoreError> {
        let updated = {
            let mut inner = self.inner.lock();
            let session = inner
                .sessions
                .iter_mut()
                .find(|s| &s.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            f(session);
            session.updated_at = Utc::now().to_rfc3339();
            session.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    /// All sessions, newest-first.
    pub fn list(&self) -> Vec<ChatSession> {
        self.inner.lock().sessions.clone()
    }

    pub fn active_id(&self) -> SessionId {
        self.inner.lock().active.clone()
    }

    pub fn set_active(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.sessions.iter().any(|s| &s.id == id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        inner.active = id.clone();
        Ok(())
    }

    /// Rewrite the whole file: write to a sibling temp file, then rename
    /// over the target. The lock is held across serialize, write, and
    /// rename — writers share one temp path, so the whole swap must be a
    /// critical section or two concurrent persists can rename each other's
    /// half-written file.
    pub fn persist(&self) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        let json = serde_json::to_string_pretty(&inner.sessions)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
