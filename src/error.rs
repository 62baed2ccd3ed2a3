use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Arbiter error: {0}")]
    Arbiter(String),

    #[error("Verifier error: {0}")]
    Verifier(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LookupError>;
