use std::path::PathBuf;

/// Core error type for the bot.
///
/// Adapter crates should map their specific errors into this type so the turn
/// handler and the HTTP layer can handle failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
