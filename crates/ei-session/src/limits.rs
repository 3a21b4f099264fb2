//! Fixed bounds and the parameters derived from them.

use std::time::Duration;

use ei_runtime::{ContextParams, SeqId};

/// Generated output stops growing at this many bytes.
pub const MAX_OUTPUT_BYTES: usize = 4096;
/// Wall-clock ceiling for the generation phase (prefill excluded).
pub const MAX_GENERATION_TIME: Duration = Duration::from_millis(10_000);
pub const MIN_CONTEXT_SIZE: i32 = 256;
pub const MAX_CONTEXT_SIZE: i32 = 4096;
pub const MIN_THREADS: i32 = 1;
pub const MAX_THREADS: i32 = 16;
/// Tokens decoded per prefill batch.
pub const PREFILL_CHUNK_SIZE: usize = 256;
/// Tokens generated per request, whatever the caller asks for.
pub const HARD_TOKEN_CAP: usize = 256;
/// Prompts must leave this many positions free for generation.
pub const PROMPT_HEADROOM: u32 = 8;
/// Generation stops this many positions short of the context end.
pub const GENERATION_HEADROOM: u32 = 2;
/// Every request runs on this sequence.
pub const DEFAULT_SEQ_ID: SeqId = 0;

pub const TOKENIZE_SLACK: usize = 32;
pub const TOKENIZE_MIN_CAPACITY: usize = 64;
pub const PIECE_CAPACITY: usize = 64;

/// Host-facing session parameters, clamped before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub context_size: i32,
    pub thread_count: i32,
}

impl SessionParams {
    pub fn new(context_size: i32, thread_count: i32) -> Self {
        Self {
            context_size,
            thread_count,
        }
    }

    /// Clamp into `[MIN_CONTEXT_SIZE, MAX_CONTEXT_SIZE]` and
    /// `[MIN_THREADS, MAX_THREADS]`.
    pub fn clamped(self) -> Self {
        Self {
            context_size: self.context_size.clamp(MIN_CONTEXT_SIZE, MAX_CONTEXT_SIZE),
            thread_count: self.thread_count.clamp(MIN_THREADS, MAX_THREADS),
        }
    }

    /// Runtime context parameters; prompt and generation threads match.
    pub fn context_params(&self) -> ContextParams {
        let p = self.clamped();
        ContextParams::new(p.context_size as u32, p.thread_count as u32)
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            context_size: 2048,
            thread_count: 4,
        }
    }
}

/// Bounds applied to one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationLimits {
    pub max_output_bytes: usize,
    pub max_generation_time: Duration,
    pub hard_token_cap: usize,
    pub prefill_chunk_size: usize,
    pub prompt_headroom: u32,
    pub generation_headroom: u32,
}

impl GenerationLimits {
    /// Token budget for a request: the caller's maximum, clamped into
    /// `[1, hard_token_cap]`.
    pub fn token_budget(&self, max_tokens: i32) -> usize {
        let cap = self.hard_token_cap.max(1);
        usize::try_from(max_tokens).map_or(1, |n| n.clamp(1, cap))
    }
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: MAX_OUTPUT_BYTES,
            max_generation_time: MAX_GENERATION_TIME,
            hard_token_cap: HARD_TOKEN_CAP,
            prefill_chunk_size: PREFILL_CHUNK_SIZE,
            prompt_headroom: PROMPT_HEADROOM,
            generation_headroom: GENERATION_HEADROOM,
        }
    }
}
