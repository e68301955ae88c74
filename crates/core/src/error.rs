use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Verifier error: {0}")]
    Verifier(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Task {0} is already active")]
    TaskActive(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
