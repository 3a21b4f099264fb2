/// Vocabulary token id.
pub type TokenId = u32;

/// Absolute position of a token within a sequence.
pub type Pos = u32;

/// Sequence id keying a context's KV cache.
pub type SeqId = i32;

/// Outcome of a call that fills a caller-provided buffer.
///
/// Runtimes report a too-small buffer with the exact capacity they need
/// instead of writing a partial result. `Written(0)` means the call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The buffer was large enough; this many elements were written.
    Written(usize),
    /// Nothing was written; the call needs a buffer of this many elements.
    NeedsCapacity(usize),
}

/// Parameters for loading a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelParams {
    /// Number of layers to offload to an accelerator (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Memory-map the model file instead of reading it.
    pub use_mmap: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            use_mmap: true,
        }
    }
}

/// Parameters for creating an execution context from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    /// Context window (KV cache capacity) in tokens.
    pub n_ctx: u32,
    /// Worker threads used for single-token decodes.
    pub n_threads: u32,
    /// Worker threads used for prompt batches.
    pub n_threads_batch: u32,
    /// Maximum tokens submitted to one decode call.
    pub n_batch: u32,
    /// Physical sub-batch size used while processing prompts.
    pub n_ubatch: u32,
    /// Disable the runtime's internal performance counters.
    pub no_perf: bool,
}

impl ContextParams {
    /// Parameters for a context of `n_ctx` tokens decoding on `n_threads`
    /// threads, with the default batch capacities.
    pub fn new(n_ctx: u32, n_threads: u32) -> Self {
        Self {
            n_ctx,
            n_threads,
            n_threads_batch: n_threads,
            ..Self::default()
        }
    }
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_threads: 4,
            n_threads_batch: 4,
            n_batch: 2048,
            n_ubatch: 512,
            no_perf: false,
        }
    }
}
