use std::sync::{PoisonError, RwLock};

use tracing::{debug, error};

use crate::backend::Backend;
use crate::error::Result;
use crate::limits::SessionParams;
use crate::source::resolve_model_path;
use crate::table::{SessionHandle, SessionTable, INVALID_HANDLE};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedModel {
    handle: SessionHandle,
    model_path: String,
    params: SessionParams,
}

/// Snapshot of a [`ModelCache`] for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheState {
    pub handle: SessionHandle,
    pub model_path: String,
    pub params: SessionParams,
    pub valid: bool,
}

/// Keeps at most one session open, keyed by model path.
///
/// Asking for the model that is already open returns its handle; asking
/// for another one closes the cached session first.
pub struct ModelCache {
    current: RwLock<Option<CachedModel>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Handle of an open session for `model_location`, opening it if needed.
    ///
    /// `params` only apply when a session is opened; a cached session keeps
    /// the parameters it was opened with.
    pub fn get_or_open(
        &self,
        table: &SessionTable,
        backend: &Backend,
        model_location: &str,
        params: SessionParams,
    ) -> Result<SessionHandle> {
        let resolved = resolve_model_path(model_location)?;
        let model_path = resolved.display().to_string();

        if let Some(handle) = self.cached_handle(table, &model_path) {
            debug!(handle, "using cached session");
            return Ok(handle);
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have opened it while we waited for the lock.
        if let Some(cached) = current.as_ref() {
            if cached.model_path == model_path && table.is_valid(cached.handle) {
                debug!(handle = cached.handle, "another thread opened it first");
                return Ok(cached.handle);
            }
        }

        if let Some(old) = current.take() {
            debug!(handle = old.handle, "closing previously cached session");
            table.close(old.handle);
        }

        let handle = table
            .open_path(backend, resolved, params)
            .inspect_err(|e| error!(error = %e, "failed to open cached session"))?;
        debug!(handle, model = %model_path, "cached session opened");
        *current = Some(CachedModel {
            handle,
            model_path,
            params: params.clamped(),
        });
        Ok(handle)
    }

    /// Close the cached session, if any. Safe to call repeatedly.
    pub fn release(&self, table: &SessionTable) -> bool {
        let released = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match released {
            Some(cached) => {
                debug!(handle = cached.handle, "releasing cached session");
                table.close(cached.handle);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, table: &SessionTable) -> CacheState {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(cached) => CacheState {
                handle: cached.handle,
                model_path: cached.model_path.clone(),
                params: cached.params,
                valid: table.is_valid(cached.handle),
            },
            None => CacheState {
                handle: INVALID_HANDLE,
                model_path: String::new(),
                params: SessionParams::default(),
                valid: false,
            },
        }
    }

    fn cached_handle(&self, table: &SessionTable, model_path: &str) -> Option<SessionHandle> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|c| c.model_path == model_path && table.is_valid(c.handle))
            .map(|c| c.handle)
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ei_runtime::scripted::Faults;
    use ei_runtime::{Script, ScriptedRuntime, ScriptedStats};

    use crate::error::SessionError;

    fn setup(script: Script) -> (Backend, SessionTable, ModelCache, Arc<ScriptedStats>) {
        let rt = ScriptedRuntime::new(script);
        let stats = rt.stats();
        (
            Backend::new(Arc::new(rt)),
            SessionTable::new(),
            ModelCache::new(),
            stats,
        )
    }

    #[test]
    fn test_same_path_reuses_session() {
        let (backend, table, cache, stats) = setup(Script::new());
        let a = cache
            .get_or_open(&table, &backend, "model.bin", SessionParams::default())
            .unwrap();
        let b = cache
            .get_or_open(&table, &backend, "model.bin", SessionParams::new(512, 1))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(stats.models_loaded(), 1);
        assert_eq!(cache.state(&table).params, SessionParams::default());
    }

    #[test]
    fn test_new_path_replaces_session() {
        let (backend, table, cache, stats) = setup(Script::new());
        let a = cache
            .get_or_open(&table, &backend, "a.bin", SessionParams::default())
            .unwrap();
        let b = cache
            .get_or_open(&table, &backend, "b.bin", SessionParams::default())
            .unwrap();
        assert_ne!(a, b);
        assert!(!table.is_valid(a));
        assert!(table.is_valid(b));
        assert_eq!(stats.live_models(), 1);
        assert_eq!(cache.state(&table).model_path, "b.bin");
    }

    #[test]
    fn test_externally_closed_session_is_reopened() {
        let (backend, table, cache, stats) = setup(Script::new());
        let a = cache
            .get_or_open(&table, &backend, "model.bin", SessionParams::default())
            .unwrap();
        table.close(a);
        let b = cache
            .get_or_open(&table, &backend, "model.bin", SessionParams::default())
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(stats.models_loaded(), 2);
    }

    #[test]
    fn test_release() {
        let (backend, table, cache, stats) = setup(Script::new());
        let handle = cache
            .get_or_open(&table, &backend, "model.bin", SessionParams::new(1024, 2))
            .unwrap();
        let state = cache.state(&table);
        assert_eq!(
            state,
            CacheState {
                handle,
                model_path: "model.bin".to_string(),
                params: SessionParams::new(1024, 2),
                valid: true,
            }
        );

        assert!(cache.release(&table));
        assert!(!cache.release(&table));
        assert_eq!(stats.live_models(), 0);
        let state = cache.state(&table);
        assert_eq!(state.handle, INVALID_HANDLE);
        assert!(!state.valid);
    }

    #[test]
    fn test_file_uri_is_resolved_once() {
        let (backend, table, cache, stats) = setup(Script::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("models:")).unwrap();
        std::fs::write(dir.path().join("models:").join("tiny.gguf"), b"gguf").unwrap();
        // Names an existing file, but reads like a URI once the scheme is stripped.
        let uri = format!("file://{}/models://tiny.gguf", dir.path().display());

        let a = cache
            .get_or_open(&table, &backend, &uri, SessionParams::default())
            .unwrap();
        let b = cache
            .get_or_open(&table, &backend, &uri, SessionParams::default())
            .unwrap();
        assert_eq!(a, b);
        assert!(table.is_valid(a));
        assert_eq!(stats.models_loaded(), 1);
        assert!(cache.state(&table).model_path.ends_with("models://tiny.gguf"));
    }

    #[test]
    fn test_failed_open_clears_cache() {
        let (backend, table, cache, _stats) = setup(Script::new().faults(Faults {
            load: true,
            ..Faults::default()
        }));
        assert!(matches!(
            cache.get_or_open(&table, &backend, "model.bin", SessionParams::default()),
            Err(SessionError::ModelLoad { .. })
        ));
        assert_eq!(cache.state(&table).handle, INVALID_HANDLE);
        assert!(table.is_empty());
    }
}
