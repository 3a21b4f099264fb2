//! Prompt prefill: decode the whole prompt before sampling starts.

use std::time::{Duration, Instant};

use tracing::{debug, error};

use ei_runtime::{Batch, Context, Pos, TokenId};

use crate::error::{Result, SessionError};
use crate::limits::{GenerationLimits, DEFAULT_SEQ_ID};

/// Result of a successful prefill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefill {
    /// Position the first generated token will occupy.
    pub n_past: Pos,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Drop every cached entry of the default sequence.
pub(crate) fn clear_sequence(ctx: &mut dyn Context) {
    ctx.kv_remove(DEFAULT_SEQ_ID, None, None);
    ctx.synchronize();
}

/// Decode `tokens` into a freshly cleared sequence in fixed-size chunks.
///
/// Positions run continuously across chunks. Only the final prompt token
/// requests logits; they seed the first sampling step. Any failed chunk
/// aborts the whole prefill.
pub fn prefill(
    ctx: &mut dyn Context,
    tokens: &[TokenId],
    limits: &GenerationLimits,
) -> Result<Prefill> {
    let n_tok = tokens.len();
    let n_ctx = ctx.n_ctx();
    if n_tok == 0 {
        return Err(SessionError::InvalidArgument("no prompt tokens".to_string()));
    }
    if n_tok as u64 >= u64::from(n_ctx.saturating_sub(limits.prompt_headroom)) {
        return Err(SessionError::PromptTooLong {
            tokens: n_tok,
            n_ctx,
        });
    }

    clear_sequence(ctx);
    debug!("KV cache cleared");

    let started = Instant::now();
    let chunk_size = limits.prefill_chunk_size.max(1);
    debug!(n_tok, chunk_size, "decoding prompt");

    let mut batch = Batch::new(chunk_size);
    let mut chunks = 0;
    for (index, chunk) in tokens.chunks(chunk_size).enumerate() {
        let start = index * chunk_size;
        let end = start + chunk.len();
        let last_chunk = end >= n_tok;

        batch.clear();
        for (j, &token) in chunk.iter().enumerate() {
            let logits = last_chunk && j + 1 == chunk.len();
            batch
                .push(token, (start + j) as Pos, DEFAULT_SEQ_ID, logits)
                .map_err(|e| SessionError::Internal(e.to_string()))?;
        }

        if index % 2 == 0 || last_chunk {
            debug!(start, end = end - 1, n_tok, "prefill chunk");
        }

        if let Err(e) = ctx.decode(&batch) {
            error!(start, end = end - 1, error = %e, "prefill decode failed");
            return Err(SessionError::Decode {
                start,
                end,
                status: e.decode_status(),
            });
        }
        chunks += 1;
    }

    let elapsed = started.elapsed();
    debug!(elapsed_ms = elapsed.as_millis() as u64, chunks, "prompt processed");

    Ok(Prefill {
        n_past: n_tok as Pos,
        chunks,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use ei_runtime::scripted::{byte, Faults, BOS};
    use ei_runtime::{ContextParams, Model, ModelParams, ModelRuntime, Script, ScriptedRuntime};

    fn setup(script: Script, n_ctx: u32) -> (ScriptedRuntime, Box<dyn Model>, Box<dyn Context>) {
        let rt = ScriptedRuntime::new(script);
        let model = rt.load_model(Path::new("m"), &ModelParams::default()).unwrap();
        let ctx = model.new_context(&ContextParams::new(n_ctx, 2)).unwrap();
        (rt, model, ctx)
    }

    fn prompt(n: usize) -> Vec<TokenId> {
        std::iter::once(BOS)
            .chain((0..n - 1).map(|i| byte(b'a' + (i % 26) as u8)))
            .collect()
    }

    #[test]
    fn test_chunks_keep_positions_and_last_logits() {
        let (rt, _model, mut ctx) = setup(Script::new(), 1024);
        let tokens = prompt(601);

        let report = prefill(ctx.as_mut(), &tokens, &GenerationLimits::default()).unwrap();
        assert_eq!(report.n_past, 601);
        assert_eq!(report.chunks, 3);

        let batches = rt.stats().take_batches();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![256, 256, 89]);

        let entries: Vec<_> = batches.concat();
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.pos, i as Pos);
            assert_eq!(e.token, tokens[i]);
            assert_eq!(e.seq_id, DEFAULT_SEQ_ID);
            assert_eq!(e.logits, i == 600);
        }
        assert!(ctx.logits().is_some());
    }

    #[test]
    fn test_exact_multiple_of_chunk() {
        let (rt, _model, mut ctx) = setup(Script::new(), 1024);
        let report = prefill(ctx.as_mut(), &prompt(512), &GenerationLimits::default()).unwrap();
        assert_eq!(report.chunks, 2);
        let batches = rt.stats().take_batches();
        assert!(!batches[0].iter().any(|e| e.logits));
        assert!(batches[1][255].logits);
    }

    #[test]
    fn test_prompt_too_long_decodes_nothing() {
        let (rt, _model, mut ctx) = setup(Script::new(), 256);
        let err = prefill(ctx.as_mut(), &prompt(248), &GenerationLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::PromptTooLong {
                tokens: 248,
                n_ctx: 256
            }
        ));
        assert_eq!(rt.stats().decode_calls(), 0);

        assert!(prefill(ctx.as_mut(), &prompt(247), &GenerationLimits::default()).is_ok());
    }

    #[test]
    fn test_clears_sequence_first() {
        let (rt, _model, mut ctx) = setup(Script::new(), 512);
        prefill(ctx.as_mut(), &prompt(10), &GenerationLimits::default()).unwrap();
        prefill(ctx.as_mut(), &prompt(10), &GenerationLimits::default()).unwrap();
        assert_eq!(rt.stats().sequence_clears(), 2);
    }

    #[test]
    fn test_failed_chunk_aborts() {
        let script = Script::new().faults(Faults {
            decode_at: Some(300),
            ..Faults::default()
        });
        let (rt, _model, mut ctx) = setup(script, 1024);
        let err = prefill(ctx.as_mut(), &prompt(700), &GenerationLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Decode {
                start: 256,
                end: 512,
                status: 1
            }
        ));
        // The first chunk went through, the third was never attempted.
        assert_eq!(rt.stats().decode_calls(), 2);
    }

    #[test]
    fn test_empty_prompt() {
        let (_rt, _model, mut ctx) = setup(Script::new(), 512);
        assert!(matches!(
            prefill(ctx.as_mut(), &[], &GenerationLimits::default()),
            Err(SessionError::InvalidArgument(_))
        ));
    }
}
