use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use ei_runtime::ModelRuntime;

use crate::error::{Result, SessionError};

/// A model runtime plus its one-time global setup.
///
/// `ensure_initialized` may be called from any number of threads; the
/// runtime's `backend_init` runs under a lock and succeeds at most once.
/// A failed setup is not remembered, so the next caller retries it.
pub struct Backend {
    runtime: Arc<dyn ModelRuntime>,
    initialized: Mutex<bool>,
}

impl Backend {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            initialized: Mutex::new(false),
        }
    }

    pub fn runtime(&self) -> &dyn ModelRuntime {
        self.runtime.as_ref()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self
            .initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *initialized {
            return Ok(());
        }
        self.runtime
            .backend_init()
            .map_err(|e| SessionError::Initialization(e.to_string()))?;
        *initialized = true;
        debug!(runtime = self.runtime.name(), "backend initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        *self
            .initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("runtime", &self.runtime.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
