//! `ei-session` - Inference sessions for edge-inference.
//!
//! A [`Session`] owns one loaded model and one execution context. Each
//! completion request tokenizes the prompt, prefills it in fixed-size
//! chunks, then generates greedily under time, size and context bounds.
//!
//! Sessions handed to a host live in a [`SessionTable`] keyed by opaque
//! integer handles; [`ModelCache`] keeps one session per model path open.

pub mod backend;
pub mod cache;
pub mod completion;
pub mod error;
pub mod generate;
pub mod limits;
pub mod prefill;
pub mod session;
pub mod source;
pub mod table;
pub mod tokenizer;

pub use backend::Backend;
pub use cache::{CacheState, ModelCache};
pub use completion::Completion;
pub use error::{Result, SessionError};
pub use generate::{Generation, Termination};
pub use limits::{GenerationLimits, SessionParams};
pub use session::Session;
pub use table::{SessionHandle, SessionTable, INVALID_HANDLE};
