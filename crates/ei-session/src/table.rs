use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::completion::Completion;
use crate::error::{Result, SessionError};
use crate::limits::{GenerationLimits, SessionParams};
use crate::session::Session;

/// Opaque session handle given to hosts. Never reused within a process.
pub type SessionHandle = u64;

/// The handle returned when no session could be opened.
pub const INVALID_HANDLE: SessionHandle = 0;

/// Thread-safe table of open sessions keyed by handle.
///
/// Each session sits behind its own mutex, held for a whole request
/// (prefill and generation), so concurrent requests on one handle run one
/// after the other and `close` waits for an in-flight request.
///
/// Only open sessions are registered and `close` unregisters before it
/// waits, so a handle is valid exactly while it is in the map. Validity
/// checks never wait on a running request.
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionHandle, Arc<Mutex<Session>>>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a session and register it.
    pub fn open(
        &self,
        backend: &Backend,
        model_location: &str,
        params: SessionParams,
    ) -> Result<SessionHandle> {
        let session = Session::open(backend, model_location, params)?;
        Ok(self.insert(session))
    }

    /// Open a session on an already resolved model path and register it.
    pub fn open_path(
        &self,
        backend: &Backend,
        model_path: PathBuf,
        params: SessionParams,
    ) -> Result<SessionHandle> {
        let session = Session::open_path(backend, model_path, params)?;
        Ok(self.insert(session))
    }

    fn insert(&self, session: Session) -> SessionHandle {
        let handle = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(Mutex::new(session)));
        debug!(handle, "session registered");
        handle
    }

    /// Unregister and close a session. Returns false for unknown handles,
    /// so closing twice is harmless.
    pub fn close(&self, handle: SessionHandle) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        match removed {
            Some(session) => {
                lock_session(&session, handle).close();
                debug!(handle, "session closed");
                true
            }
            None => {
                debug!(handle, "close of unknown handle ignored");
                false
            }
        }
    }

    pub fn is_valid(&self, handle: SessionHandle) -> bool {
        handle != INVALID_HANDLE
            && self
                .sessions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&handle)
    }

    /// Run a completion on the session behind `handle`.
    pub fn complete(
        &self,
        handle: SessionHandle,
        prompt: &str,
        max_tokens: i32,
        limits: &GenerationLimits,
    ) -> Result<Completion> {
        let session = self.get(handle).ok_or(SessionError::InvalidSession)?;
        let mut session = lock_session(&session, handle);
        session.complete(prompt, max_tokens, limits)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, handle: SessionHandle) -> Option<Arc<Mutex<Session>>> {
        if handle == INVALID_HANDLE {
            return None;
        }
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a session, recovering it if a previous request panicked. Every
/// request clears the KV cache before use, so the state is safe to reuse.
fn lock_session(session: &Mutex<Session>, handle: SessionHandle) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| {
        warn!(handle, "recovering session after a panicked request");
        poisoned.into_inner()
    })
}
