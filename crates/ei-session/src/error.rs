use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("backend initialization failed: {0}")]
    Initialization(String),
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("failed to create context: {0}")]
    ContextCreate(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("prompt too long: {tokens} tokens for a context of {n_ctx}")]
    PromptTooLong { tokens: usize, n_ctx: u32 },
    #[error("prefill decode failed for tokens {start}..{end} (status {status})")]
    Decode { start: usize, end: usize, status: i32 },
    #[error("sampler unavailable: {0}")]
    SamplerCreate(String),
    #[error("session is closed or was never opened")]
    InvalidSession,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
