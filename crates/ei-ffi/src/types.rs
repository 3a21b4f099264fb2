use std::os::raw::c_char;

use ei_session::{Completion, SessionError, Termination};

/// Opaque session handle. `0` is never a valid session.
pub type EiHandle = u64;

/// Status codes returned by FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EiStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorInitialization = 2,
    ErrorModelLoad = 3,
    ErrorContextCreate = 4,
    ErrorTokenization = 5,
    ErrorPromptTooLong = 6,
    ErrorDecode = 7,
    ErrorSampler = 8,
    ErrorInvalidHandle = 9,
    ErrorInternal = 10,
}

impl From<&SessionError> for EiStatus {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::InvalidArgument(_) => EiStatus::ErrorInvalidArgument,
            SessionError::Initialization(_) => EiStatus::ErrorInitialization,
            SessionError::ModelLoad { .. } => EiStatus::ErrorModelLoad,
            SessionError::ContextCreate(_) => EiStatus::ErrorContextCreate,
            SessionError::Tokenization(_) => EiStatus::ErrorTokenization,
            SessionError::PromptTooLong { .. } => EiStatus::ErrorPromptTooLong,
            SessionError::Decode { .. } => EiStatus::ErrorDecode,
            SessionError::SamplerCreate(_) => EiStatus::ErrorSampler,
            SessionError::InvalidSession => EiStatus::ErrorInvalidHandle,
            SessionError::Internal(_) => EiStatus::ErrorInternal,
        }
    }
}

/// Why generation stopped. `None` marks a request that failed before
/// generating.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EiTermination {
    None = 0,
    Timeout = 1,
    OutputSizeLimit = 2,
    ContextFull = 3,
    EndOfGeneration = 4,
    DecodeError = 5,
    TokenBudgetExhausted = 6,
}

impl From<Termination> for EiTermination {
    fn from(t: Termination) -> Self {
        match t {
            Termination::Timeout => EiTermination::Timeout,
            Termination::OutputSizeLimit => EiTermination::OutputSizeLimit,
            Termination::ContextFull => EiTermination::ContextFull,
            Termination::EndOfGeneration => EiTermination::EndOfGeneration,
            Termination::DecodeError => EiTermination::DecodeError,
            Termination::TokenBudgetExhausted => EiTermination::TokenBudgetExhausted,
        }
    }
}

/// Detailed result of `ei_complete_ex`.
///
/// `text` is owned by the library; release it with `ei_completion_free`.
#[repr(C)]
#[derive(Debug)]
pub struct EiCompletion {
    pub text: *mut c_char,
    pub termination: EiTermination,
    pub prompt_tokens: u32,
    pub generated_tokens: u32,
    pub prefill_ms: u64,
    pub generation_ms: u64,
}

impl EiCompletion {
    pub fn empty() -> Self {
        Self {
            text: std::ptr::null_mut(),
            termination: EiTermination::None,
            prompt_tokens: 0,
            generated_tokens: 0,
            prefill_ms: 0,
            generation_ms: 0,
        }
    }

    /// Fill in everything but the text pointer.
    pub(crate) fn from_report(c: &Completion, text: *mut c_char) -> Self {
        Self {
            text,
            termination: c.termination.into(),
            prompt_tokens: u32::try_from(c.prompt_tokens).unwrap_or(u32::MAX),
            generated_tokens: u32::try_from(c.generated_tokens).unwrap_or(u32::MAX),
            prefill_ms: c.prefill_time.as_millis() as u64,
            generation_ms: c.generation_time.as_millis() as u64,
        }
    }
}
