//! A deterministic in-process runtime.
//!
//! The scripted runtime tokenizes byte-by-byte and replies with a fixed
//! sequence of "word" tokens. The next token is derived from the tokens
//! cached for the sequence, so stale KV cache state changes the reply.
//! Every resource and decode is counted in [`ScriptedStats`].
//!
//! Token layout:
//!   0          unused
//!   1          BOS
//!   2          EOS (end of generation)
//!   3..=258    one token per byte value
//!   259..      words, in the order they were added to the [`Script`]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::batch::{Batch, BatchEntry};
use crate::error::{Result, RuntimeError};
use crate::runtime::{Context, Model, ModelRuntime, Vocab};
use crate::types::{ContextParams, Fill, ModelParams, Pos, SeqId, TokenId};

pub const BOS: TokenId = 1;
pub const EOS: TokenId = 2;
const BYTE_BASE: TokenId = 3;
pub const FIRST_WORD: TokenId = BYTE_BASE + 256;

/// Token id of the `index`-th word of a script.
pub fn word(index: usize) -> TokenId {
    FIRST_WORD + index as TokenId
}

/// Token id of a raw byte.
pub fn byte(b: u8) -> TokenId {
    BYTE_BASE + b as TokenId
}

/// Failures the scripted runtime injects on demand.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub backend_init: bool,
    pub load: bool,
    pub context: bool,
    /// Fail the first decode of every context (the warmup).
    pub first_decode: bool,
    /// Fail any decode whose batch holds this position.
    pub decode_at: Option<Pos>,
    /// Report every tokenization as failed.
    pub tokenize: bool,
}

/// What a scripted model says.
#[derive(Debug, Clone, Default)]
pub struct Script {
    words: Vec<String>,
    reply: Vec<usize>,
    repeat: Option<usize>,
    faults: Faults,
    decode_delay: Duration,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a word token whose piece is `piece`. Ids follow insertion order.
    pub fn word(mut self, piece: &str) -> Self {
        self.words.push(piece.to_string());
        self
    }

    /// Reply with these words (by index) after any prompt, then EOS.
    pub fn reply(mut self, words: &[usize]) -> Self {
        self.reply = words.to_vec();
        self
    }

    /// After the reply, keep emitting this word instead of EOS.
    pub fn then_repeat(mut self, word: usize) -> Self {
        self.repeat = Some(word);
        self
    }

    pub fn faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Sleep this long inside every decode.
    pub fn decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    fn n_tokens(&self) -> usize {
        FIRST_WORD as usize + self.words.len()
    }

    /// Next token after `history`: words already generated are the trailing
    /// word tokens, since prompts tokenize to bytes only.
    fn next_token(&self, history: &[TokenId]) -> TokenId {
        let generated = history.iter().rev().take_while(|&&t| t >= FIRST_WORD).count();
        match self.reply.get(generated).or(self.repeat.as_ref()) {
            Some(&w) => word(w),
            None => EOS,
        }
    }

    fn piece(&self, token: TokenId) -> &[u8] {
        match token {
            t if t >= FIRST_WORD => self
                .words
                .get((t - FIRST_WORD) as usize)
                .map(|w| w.as_bytes())
                .unwrap_or(&[]),
            t if t >= BYTE_BASE => &BYTE_PIECES[(t - BYTE_BASE) as usize..][..1],
            _ => &[],
        }
    }
}

static BYTE_PIECES: [u8; 256] = {
    let mut bytes = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        bytes[i] = i as u8;
        i += 1;
    }
    bytes
};

/// Counters shared by a scripted runtime and everything it creates.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    backend_inits: AtomicUsize,
    models_loaded: AtomicUsize,
    live_models: AtomicIsize,
    live_contexts: AtomicIsize,
    decode_calls: AtomicUsize,
    sequence_clears: AtomicUsize,
    max_decoded_pos: Mutex<Option<Pos>>,
    batches: Mutex<Vec<Vec<BatchEntry>>>,
    context_params: Mutex<Option<ContextParams>>,
}

impl ScriptedStats {
    pub fn backend_inits(&self) -> usize {
        self.backend_inits.load(Ordering::SeqCst)
    }

    pub fn models_loaded(&self) -> usize {
        self.models_loaded.load(Ordering::SeqCst)
    }

    /// Models loaded and not yet dropped. Negative means a double free.
    pub fn live_models(&self) -> isize {
        self.live_models.load(Ordering::SeqCst)
    }

    /// Contexts created and not yet dropped. Negative means a double free.
    pub fn live_contexts(&self) -> isize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    /// Number of whole-sequence KV cache removals.
    pub fn sequence_clears(&self) -> usize {
        self.sequence_clears.load(Ordering::SeqCst)
    }

    /// Highest position ever submitted to a successful decode.
    pub fn max_decoded_pos(&self) -> Option<Pos> {
        *lock(&self.max_decoded_pos)
    }

    /// Drain the record of successfully decoded batches.
    pub fn take_batches(&self) -> Vec<Vec<BatchEntry>> {
        std::mem::take(&mut *lock(&self.batches))
    }

    /// Parameters of the most recently created context.
    pub fn last_context_params(&self) -> Option<ContextParams> {
        lock(&self.context_params).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A [`ModelRuntime`] that follows a [`Script`].
#[derive(Debug, Clone)]
pub struct ScriptedRuntime {
    script: Arc<Script>,
    stats: Arc<ScriptedStats>,
}

impl ScriptedRuntime {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        Arc::clone(&self.stats)
    }
}

impl ModelRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    fn backend_init(&self) -> Result<()> {
        if self.script.faults.backend_init {
            return Err(RuntimeError::BackendInit("scripted failure".to_string()));
        }
        self.stats.backend_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<Box<dyn Model>> {
        if self.script.faults.load {
            return Err(RuntimeError::ModelLoad {
                path: path.display().to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.stats.models_loaded.fetch_add(1, Ordering::SeqCst);
        self.stats.live_models.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            vocab: ScriptedVocab {
                script: Arc::clone(&self.script),
            },
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct ScriptedModel {
    vocab: ScriptedVocab,
    stats: Arc<ScriptedStats>,
}

impl Model for ScriptedModel {
    fn vocab(&self) -> &dyn Vocab {
        &self.vocab
    }

    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>> {
        if self.vocab.script.faults.context {
            return Err(RuntimeError::ContextCreate("scripted failure".to_string()));
        }
        *lock(&self.stats.context_params) = Some(params.clone());
        self.stats.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            script: Arc::clone(&self.vocab.script),
            stats: Arc::clone(&self.stats),
            n_ctx: params.n_ctx,
            cells: BTreeMap::new(),
            logits: None,
            decodes: 0,
        }))
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.stats.live_models.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedVocab {
    script: Arc<Script>,
}

impl Vocab for ScriptedVocab {
    fn n_tokens(&self) -> usize {
        self.script.n_tokens()
    }

    fn bos(&self) -> TokenId {
        BOS
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == EOS
    }

    fn tokenize(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        _parse_special: bool,
    ) -> Fill {
        if self.script.faults.tokenize {
            return Fill::Written(0);
        }
        let needed = text.len() + usize::from(add_special);
        if needed > out.len() {
            return Fill::NeedsCapacity(needed);
        }
        let tokens = add_special
            .then_some(BOS)
            .into_iter()
            .chain(text.bytes().map(byte));
        for (slot, token) in out.iter_mut().zip(tokens) {
            *slot = token;
        }
        Fill::Written(needed)
    }

    fn token_to_piece(&self, token: TokenId, out: &mut [u8], _special: bool) -> Fill {
        let piece = self.script.piece(token);
        if piece.len() > out.len() {
            return Fill::NeedsCapacity(piece.len());
        }
        out[..piece.len()].copy_from_slice(piece);
        Fill::Written(piece.len())
    }
}

struct ScriptedContext {
    script: Arc<Script>,
    stats: Arc<ScriptedStats>,
    n_ctx: u32,
    /// (sequence, position) -> token
    cells: BTreeMap<(SeqId, Pos), TokenId>,
    logits: Option<Vec<f32>>,
    decodes: usize,
}

impl ScriptedContext {
    fn history(&self, seq_id: SeqId) -> Vec<TokenId> {
        self.cells
            .range((seq_id, 0)..=(seq_id, Pos::MAX))
            .map(|(_, &t)| t)
            .collect()
    }
}

impl Context for ScriptedContext {
    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        self.stats.decode_calls.fetch_add(1, Ordering::SeqCst);
        self.decodes += 1;

        if !self.script.decode_delay.is_zero() {
            std::thread::sleep(self.script.decode_delay);
        }
        if batch.is_empty() {
            return Err(RuntimeError::Decode(-1));
        }
        if self.script.faults.first_decode && self.decodes == 1 {
            return Err(RuntimeError::Decode(1));
        }
        let entries = batch.entries();
        if entries
            .iter()
            .any(|e| Some(e.pos) == self.script.faults.decode_at || e.pos >= self.n_ctx)
        {
            return Err(RuntimeError::Decode(1));
        }

        for e in entries {
            self.cells.insert((e.seq_id, e.pos), e.token);
        }
        if let Some(max) = entries.iter().map(|e| e.pos).max() {
            let mut highest = lock(&self.stats.max_decoded_pos);
            *highest = Some(highest.map_or(max, |h| h.max(max)));
        }
        lock(&self.stats.batches).push(entries.to_vec());

        self.logits = batch.last_logits_index().map(|i| {
            let next = self.script.next_token(&self.history(entries[i].seq_id));
            let mut row = vec![0.0f32; self.script.n_tokens()];
            row[next as usize] = 1.0;
            row
        });
        Ok(())
    }

    fn logits(&self) -> Option<&[f32]> {
        self.logits.as_deref()
    }

    fn kv_remove(&mut self, seq_id: SeqId, from: Option<Pos>, to: Option<Pos>) -> bool {
        let lo = from.unwrap_or(0);
        let hi = to.unwrap_or(Pos::MAX);
        self.cells
            .retain(|&(seq, pos), _| seq != seq_id || pos < lo || (to.is_some() && pos >= hi));
        if from.is_none() && to.is_none() {
            self.stats.sequence_clears.fetch_add(1, Ordering::SeqCst);
        }
        true
    }

    fn synchronize(&mut self) {}
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.stats.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}
