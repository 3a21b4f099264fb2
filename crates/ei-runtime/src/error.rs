use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("backend initialization failed: {0}")]
    BackendInit(String),
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("failed to create context: {0}")]
    ContextCreate(String),
    #[error("decode returned status {0}")]
    Decode(i32),
    #[error("batch is full (capacity {capacity})")]
    BatchFull { capacity: usize },
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Native status code of a failed decode, or -1 for other failures.
    pub fn decode_status(&self) -> i32 {
        match self {
            RuntimeError::Decode(status) => *status,
            _ => -1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
