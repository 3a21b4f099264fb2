use std::path::Path;

use crate::batch::Batch;
use crate::error::Result;
use crate::types::{ContextParams, Fill, ModelParams, Pos, SeqId, TokenId};

/// Entry point of a native inference backend.
///
/// Implementations load models from disk and own any process-wide state
/// the backend needs. Callers serialize [`ModelRuntime::backend_init`];
/// it is invoked once before the first model is loaded.
pub trait ModelRuntime: Send + Sync {
    /// Returns the name of this runtime (e.g., "llama.cpp", "scripted").
    fn name(&self) -> &str;

    /// One-time global setup (thread pools, hardware backend selection).
    fn backend_init(&self) -> Result<()>;

    /// Load a model file. Dropping the returned model frees it.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Box<dyn Model>>;
}

/// A loaded model: weights plus vocabulary.
pub trait Model: Send {
    /// The model's vocabulary.
    fn vocab(&self) -> &dyn Vocab;

    /// Create an execution context bound to this model.
    ///
    /// The context must be dropped before the model that created it.
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>>;
}

/// Tokenizer and special-token queries for a model.
pub trait Vocab {
    /// Number of tokens in the vocabulary (length of a logits row).
    fn n_tokens(&self) -> usize;

    /// Beginning-of-sequence token.
    fn bos(&self) -> TokenId;

    /// Whether `token` marks the end of generation (EOS, EOT, ...).
    fn is_eog(&self, token: TokenId) -> bool;

    /// Tokenize `text` into `out`.
    ///
    /// - `add_special`: prepend BOS (and other model-defined special tokens).
    /// - `parse_special`: treat special-token text in `text` as special tokens.
    fn tokenize(&self, text: &str, out: &mut [TokenId], add_special: bool, parse_special: bool)
        -> Fill;

    /// Write the text fragment for `token` into `out`.
    ///
    /// Fragments are raw bytes and may hold a partial UTF-8 sequence.
    fn token_to_piece(&self, token: TokenId, out: &mut [u8], special: bool) -> Fill;
}

/// Execution state of a model, including its KV cache.
pub trait Context: Send {
    /// Context window (KV cache capacity) in tokens.
    fn n_ctx(&self) -> u32;

    /// Decode a batch, appending its tokens to the KV cache.
    ///
    /// A non-zero native status is reported as `RuntimeError::Decode`.
    fn decode(&mut self, batch: &Batch) -> Result<()>;

    /// Logits of the last token that requested them in the most recent
    /// successful decode, one value per vocabulary entry.
    fn logits(&self) -> Option<&[f32]>;

    /// Remove KV cache entries of `seq_id` with positions in `[from, to)`.
    /// `None` bounds are open, so `(None, None)` clears the whole sequence.
    fn kv_remove(&mut self, seq_id: SeqId, from: Option<Pos>, to: Option<Pos>) -> bool;

    /// Wait for all queued work on this context to finish.
    fn synchronize(&mut self);
}
