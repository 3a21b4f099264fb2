//! Bounded autoregressive generation.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use ei_runtime::{Batch, Context, Pos, Vocab};
use ei_sampler::SamplerChain;

use crate::limits::{GenerationLimits, DEFAULT_SEQ_ID};
use crate::tokenizer;

/// Why a generation loop stopped. Every reason is a normal outcome; the
/// output produced so far is always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// Generation ran past the time ceiling.
    Timeout,
    /// The output reached its size ceiling.
    OutputSizeLimit,
    /// The next position would leave no headroom in the context.
    ContextFull,
    /// The model emitted an end-of-generation token.
    EndOfGeneration,
    /// Feeding a generated token back failed, or no logits were available.
    DecodeError,
    /// The request's token budget is spent.
    TokenBudgetExhausted,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Timeout => "timeout",
            Termination::OutputSizeLimit => "output_size_limit",
            Termination::ContextFull => "context_full",
            Termination::EndOfGeneration => "end_of_generation",
            Termination::DecodeError => "decode_error",
            Termination::TokenBudgetExhausted => "token_budget_exhausted",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one generation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Raw output bytes; pieces may split UTF-8 sequences.
    pub output: Vec<u8>,
    pub tokens_generated: usize,
    /// Position after the last decoded token.
    pub end_pos: Pos,
    pub termination: Termination,
    pub elapsed: Duration,
}

struct GenerationState {
    pos: Pos,
    output: Vec<u8>,
    generated: usize,
    started: Instant,
}

impl GenerationState {
    /// Bounds checked before every sample, in this order.
    fn bound_reached(&self, n_ctx: u32, limits: &GenerationLimits) -> Option<Termination> {
        let elapsed = self.started.elapsed();
        if elapsed > limits.max_generation_time {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "generation timeout");
            return Some(Termination::Timeout);
        }
        if self.output.len() >= limits.max_output_bytes {
            debug!(output_len = self.output.len(), "output size limit reached");
            return Some(Termination::OutputSizeLimit);
        }
        if self.pos >= n_ctx.saturating_sub(limits.generation_headroom) {
            debug!(pos = self.pos, n_ctx, "context full");
            return Some(Termination::ContextFull);
        }
        None
    }

    /// Append a piece, clipped so the output never exceeds `max` bytes.
    fn append(&mut self, piece: &[u8], max: usize) {
        let room = max.saturating_sub(self.output.len());
        self.output.extend_from_slice(&piece[..piece.len().min(room)]);
    }
}

/// Generate greedily from the context's current logits.
///
/// `start_pos` is the position the first generated token occupies (the
/// prompt length after prefill). Generates at most `budget` tokens.
pub fn generate(
    ctx: &mut dyn Context,
    vocab: &dyn Vocab,
    sampler: &SamplerChain,
    start_pos: Pos,
    budget: usize,
    limits: &GenerationLimits,
) -> Generation {
    let n_ctx = ctx.n_ctx();
    let mut state = GenerationState {
        pos: start_pos,
        output: Vec::with_capacity(limits.max_output_bytes),
        generated: 0,
        started: Instant::now(),
    };

    let termination = loop {
        if state.generated >= budget {
            break Termination::TokenBudgetExhausted;
        }
        if let Some(reason) = state.bound_reached(n_ctx, limits) {
            break reason;
        }

        let Some(token) = ctx.logits().and_then(|logits| sampler.sample(logits)) else {
            warn!(pos = state.pos, "no token could be sampled");
            break Termination::DecodeError;
        };

        if vocab.is_eog(token) {
            debug!(token, "end-of-generation token");
            break Termination::EndOfGeneration;
        }

        let piece = tokenizer::detokenize(vocab, token);
        state.append(&piece, limits.max_output_bytes);

        if let Err(e) = ctx.decode(&Batch::single(token, state.pos, DEFAULT_SEQ_ID)) {
            error!(pos = state.pos, error = %e, "decode of generated token failed");
            break Termination::DecodeError;
        }

        state.pos += 1;
        state.generated += 1;

        if state.generated % 16 == 0 {
            debug!(
                tokens = state.generated,
                elapsed_ms = state.started.elapsed().as_millis() as u64,
                "generating"
            );
        }
    };

    let elapsed = state.started.elapsed();
    debug!(
        tokens_generated = state.generated,
        elapsed_ms = elapsed.as_millis() as u64,
        output_len = state.output.len(),
        reason = %termination,
        "generation done"
    );

    Generation {
        output: state.output,
        tokens_generated: state.generated,
        end_pos: state.pos,
        termination,
        elapsed,
    }
}
