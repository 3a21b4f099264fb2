//! `ei-runtime` - Model runtime boundary for edge-inference.
//!
//! This crate provides:
//! - The `ModelRuntime`, `Model`, `Vocab` and `Context` traits a native
//!   inference backend implements
//! - A fixed-capacity `Batch` describing one decode call
//! - The `Fill` result used by buffer-filling calls (tokenize, token-to-piece)
//! - A deterministic `ScriptedRuntime` for tests and host smoke-tests

pub mod batch;
pub mod error;
pub mod runtime;
pub mod scripted;
pub mod types;

// Re-export primary types at the crate root for convenience.
pub use batch::{Batch, BatchEntry};
pub use error::{Result, RuntimeError};
pub use runtime::{Context, Model, ModelRuntime, Vocab};
pub use scripted::{Script, ScriptedRuntime, ScriptedStats};
pub use types::{ContextParams, Fill, ModelParams, Pos, SeqId, TokenId};
