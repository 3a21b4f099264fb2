//! Process-wide state behind the C ABI: one model runtime, one backend
//! initializer, one session table and one cached-model slot.

use std::sync::{Arc, OnceLock};

use ei_runtime::ModelRuntime;
use ei_session::{Backend, CacheState, ModelCache, SessionError, SessionTable};
use tracing::{info, warn};

static BACKEND: OnceLock<Backend> = OnceLock::new();
static SESSIONS: OnceLock<SessionTable> = OnceLock::new();
static CACHE: OnceLock<ModelCache> = OnceLock::new();

/// Install the model runtime used by every C entry point.
///
/// This is a Rust API: a C host needs a small Rust shim, linked into the
/// same library, that calls it before the first `ei_open`. Only the first
/// call takes effect; returns false if a runtime was already installed.
pub fn install_runtime(runtime: Arc<dyn ModelRuntime>) -> bool {
    let name = runtime.name().to_string();
    let installed = BACKEND.set(Backend::new(runtime)).is_ok();
    if installed {
        info!(runtime = %name, "model runtime installed");
    } else {
        warn!(runtime = %name, "model runtime already installed, ignoring");
    }
    installed
}

pub(crate) fn backend() -> Result<&'static Backend, SessionError> {
    installed(&BACKEND)
}

fn installed(slot: &OnceLock<Backend>) -> Result<&Backend, SessionError> {
    slot.get().ok_or_else(|| {
        SessionError::Initialization(
            "no model runtime installed; call install_runtime from Rust before ei_open".to_string(),
        )
    })
}

pub(crate) fn sessions() -> &'static SessionTable {
    SESSIONS.get_or_init(SessionTable::new)
}

pub(crate) fn cache() -> &'static ModelCache {
    CACHE.get_or_init(ModelCache::new)
}

/// Snapshot of the cached-model slot used by `ei_cached_open`.
pub fn cache_state() -> CacheState {
    cache().state(sessions())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ei_runtime::{Script, ScriptedRuntime};

    #[test]
    fn test_missing_runtime_is_an_initialization_error() {
        let slot = OnceLock::new();
        match installed(&slot) {
            Err(SessionError::Initialization(msg)) => assert!(msg.contains("install_runtime")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(slot
            .set(Backend::new(Arc::new(ScriptedRuntime::new(Script::new()))))
            .is_ok());
        assert!(installed(&slot).is_ok());
    }
}
