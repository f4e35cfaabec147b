//! Errors raised while loading settings and preparing the data directory.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting is present but unusable.
    #[error("Invalid setting: {0}")]
    Config(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// `sync_url` does not parse.
    #[error("Malformed sync URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `config.json` is not valid JSON for [`Config`](crate::Config).
    #[error("Unreadable config file: {0}")]
    Json(#[from] serde_json::Error),

    /// No home directory to root `~/.fieldops` in.
    #[error("Cannot resolve data directory: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
