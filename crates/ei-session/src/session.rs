use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use ei_runtime::{Batch, Context, Model, ModelParams};
use ei_sampler::SamplerChain;

use crate::backend::Backend;
use crate::completion::{finish_text, Completion};
use crate::error::{Result, SessionError};
use crate::generate::generate;
use crate::limits::{GenerationLimits, SessionParams, DEFAULT_SEQ_ID};
use crate::prefill::{clear_sequence, prefill};
use crate::source::resolve_model_path;
use crate::tokenizer;

/// One loaded model and the context decoding with it.
///
/// The context is always released before the model. Once closed (or if
/// construction failed) every request fails with `InvalidSession`.
pub struct Session {
    context: Option<Box<dyn Context>>,
    model: Option<Box<dyn Model>>,
    model_path: PathBuf,
    params: SessionParams,
}

impl Session {
    /// Load a model and create a warmed-up context for it.
    ///
    /// `params` are clamped into the supported ranges. Anything acquired
    /// before a failure is released before the error is returned.
    pub fn open(backend: &Backend, model_location: &str, params: SessionParams) -> Result<Session> {
        Self::open_path(backend, resolve_model_path(model_location)?, params)
    }

    /// Like [`Session::open`], for a location already resolved to a path.
    pub fn open_path(
        backend: &Backend,
        model_path: PathBuf,
        params: SessionParams,
    ) -> Result<Session> {
        let params = params.clamped();

        backend.ensure_initialized()?;

        debug!(
            model = %model_path.display(),
            n_ctx = params.context_size,
            n_threads = params.thread_count,
            "opening session"
        );

        let model = backend
            .runtime()
            .load_model(&model_path, &ModelParams::default())
            .map_err(|e| {
                error!(model = %model_path.display(), error = %e, "failed to load model");
                SessionError::ModelLoad {
                    path: model_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        // On failure the model is dropped on return.
        let context = model.new_context(&params.context_params()).map_err(|e| {
            error!(error = %e, "failed to create context, releasing model");
            SessionError::ContextCreate(e.to_string())
        })?;

        let mut session = Session {
            context: Some(context),
            model: Some(model),
            model_path,
            params,
        };
        session.warmup();

        debug!(n_ctx = ?session.n_ctx(), "session ready");
        Ok(session)
    }

    /// Decode a lone BOS so the runtime allocates its buffers, then drop
    /// it from the cache. A failed warmup is not fatal.
    fn warmup(&mut self) {
        let (Some(context), Some(model)) = (self.context.as_deref_mut(), self.model.as_deref())
        else {
            return;
        };
        let bos = model.vocab().bos();
        match context.decode(&Batch::single(bos, 0, DEFAULT_SEQ_ID)) {
            Ok(()) => debug!("warmup complete"),
            Err(e) => warn!(error = %e, "warmup decode failed (may be OK)"),
        }
        clear_sequence(context);
        debug!("KV cache cleared after warmup");
    }

    /// Release the context, then the model. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(context) = self.context.take() {
            debug!(model = %self.model_path.display(), "releasing context");
            drop(context);
        }
        if let Some(model) = self.model.take() {
            debug!(model = %self.model_path.display(), "releasing model");
            drop(model);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.context.is_some() && self.model.is_some()
    }

    /// Context window of the live context, if any.
    pub fn n_ctx(&self) -> Option<u32> {
        self.context.as_ref().map(|c| c.n_ctx())
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// The clamped parameters the session was opened with.
    pub fn params(&self) -> SessionParams {
        self.params
    }

    /// Generate a completion of `prompt`.
    ///
    /// Fails only before generation starts (invalid session or prompt,
    /// tokenization, prompt length, prefill). Once tokens are being
    /// generated every stop, including a decode failure, yields the text
    /// produced so far.
    pub fn complete(
        &mut self,
        prompt: &str,
        max_tokens: i32,
        limits: &GenerationLimits,
    ) -> Result<Completion> {
        let (Some(context), Some(model)) = (self.context.as_deref_mut(), self.model.as_deref())
        else {
            error!("completion on an invalid session");
            return Err(SessionError::InvalidSession);
        };
        if prompt.is_empty() {
            warn!("empty prompt");
            return Err(SessionError::InvalidArgument("empty prompt".to_string()));
        }

        let vocab = model.vocab();
        let n_ctx = context.n_ctx();
        debug!(prompt_len = prompt.len(), n_ctx, max_tokens, "completion start");

        let tokens = tokenizer::tokenize(vocab, prompt).inspect_err(|e| warn!(error = %e))?;
        debug!(n_tok = tokens.len(), "tokenized");

        let prefilled = prefill(context, &tokens, limits).inspect_err(|e| warn!(error = %e))?;

        let sampler = SamplerChain::greedy();
        if context.logits().is_none() {
            error!("no logits after prefill");
            return Err(SessionError::SamplerCreate(
                "no logits for the final prompt position".to_string(),
            ));
        }

        let generation = generate(
            context,
            vocab,
            &sampler,
            prefilled.n_past,
            limits.token_budget(max_tokens),
            limits,
        );

        Ok(Completion {
            text: finish_text(generation.output, limits.max_output_bytes),
            termination: generation.termination,
            prompt_tokens: tokens.len(),
            generated_tokens: generation.tokens_generated,
            prefill_time: prefilled.elapsed,
            generation_time: generation.elapsed,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("model_path", &self.model_path)
            .field("params", &self.params)
            .field("valid", &self.is_valid())
            .finish()
    }
}
