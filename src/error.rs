use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Unknown run: {0}")]
    RunNotFound(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Model API error: {0}")]
    ModelApi(String),

    #[error("Model API rate limited: {0}")]
    ModelRateLimited(String),

    #[error("Step execution error: {0}")]
    Step(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Rate-limit errors are the only class that earns a delayed retry.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::ModelRateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
