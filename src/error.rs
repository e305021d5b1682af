use std::io;

/// Custom error type for pr_bench operations
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),

    #[error("Git operation failed: {operation}\n{message}")]
    Vcs { operation: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Benchmark {operation} failed: {message}")]
    BenchmarkExecution { operation: String, message: String },

    #[error("Comment API request failed: {0}")]
    Transport(String),

    #[error("Job cancelled during {step}")]
    Cancelled { step: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<reqwest::Error> for BenchError {
    fn from(e: reqwest::Error) -> Self {
        BenchError::Transport(e.to_string())
    }
}
